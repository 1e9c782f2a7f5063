//! Dependency-driven scheduling of one level of units
//!
//! The coordinator runs on the calling thread and is the only place unit
//! states change for its level. Processor calls run on a dedicated rayon
//! pool sized to the configured job count; workers report back over a
//! channel. Levels are processed in intent phases (Assert, Inform, Apply)
//! and within a phase in document order, dispatching a unit as soon as all
//! its dependencies are terminal.
//!
//! A group's children are scheduled as their own level, from the worker
//! that processed the group unit, on a pool of their own.

use crate::cancel::CancellationToken;
use crate::environment::EnvironmentPool;
use crate::error::ErrorCode;
use crate::events::EventEmitter;
use crate::executor;
use crate::graph::DependencyGraph;
use crate::types::{Intent, ResultInfo, ResultSource, UnitResult, UnitState};
use crate::unit::{ConfigurationUnit, UnitEnvironment};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// State shared by every level of one apply run
pub(crate) struct RunContext<'a> {
    pub pool: &'a EnvironmentPool<'a>,
    pub emitter: &'a EventEmitter,
    pub cancel: &'a CancellationToken,
    pub set_id: Uuid,
    pub default_environment: &'a UnitEnvironment,
    pub jobs: usize,
    aborted: AtomicBool,
}

impl<'a> RunContext<'a> {
    pub fn new(
        pool: &'a EnvironmentPool<'a>,
        emitter: &'a EventEmitter,
        cancel: &'a CancellationToken,
        set_id: Uuid,
        default_environment: &'a UnitEnvironment,
        jobs: usize,
    ) -> Self {
        Self {
            pool,
            emitter,
            cancel,
            set_id,
            default_environment,
            jobs: jobs.max(1),
            aborted: AtomicBool::new(false),
        }
    }

    /// Stop dispatching anywhere in the set after a failed assertion
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Code for units that will no longer be dispatched, if halting
    pub fn halt_reason(&self) -> Option<ErrorCode> {
        if self.aborted.load(Ordering::SeqCst) {
            Some(ErrorCode::AssertionFailed)
        } else if self.cancel.is_cancelled() {
            Some(ErrorCode::OperationCancelled)
        } else {
            None
        }
    }

    pub fn emit_unit(&self, unit: &ConfigurationUnit, state: UnitState, result: &ResultInfo) {
        self.emitter
            .unit_state(self.set_id, unit.to_ref(), state, result.clone());
    }
}

/// Outcome of one unit and, for groups, its children
#[derive(Debug, Clone)]
pub(crate) struct UnitRecord {
    pub result: UnitResult,
    /// Parallel to the unit's children; `None` for inactive ones
    pub children: Vec<Option<UnitRecord>>,
}

impl UnitRecord {
    pub fn new(unit: &ConfigurationUnit, state: UnitState, result: ResultInfo) -> Self {
        Self {
            result: UnitResult {
                unit: unit.to_ref(),
                state,
                previously_in_desired_state: false,
                reboot_required: false,
                result,
            },
            children: Vec::new(),
        }
    }

    fn flatten_into(&self, out: &mut Vec<UnitResult>) {
        out.push(self.result.clone());
        for child in self.children.iter().flatten() {
            child.flatten_into(out);
        }
    }
}

/// Depth-first unit results, in document order
pub(crate) fn flatten(records: &[Option<UnitRecord>]) -> Vec<UnitResult> {
    let mut out = Vec::new();
    for record in records.iter().flatten() {
        record.flatten_into(&mut out);
    }
    out
}

/// Record every active child of `unit` as skipped without running it
pub(crate) fn skip_children(
    ctx: &RunContext<'_>,
    unit: &ConfigurationUnit,
    cause: Option<ErrorCode>,
) -> Vec<Option<UnitRecord>> {
    let code = match cause {
        Some(code @ (ErrorCode::AssertionFailed | ErrorCode::OperationCancelled)) => code,
        _ => ErrorCode::DependencyUnsatisfied,
    };

    unit.units
        .iter()
        .map(|child| {
            if !child.is_active {
                return None;
            }
            let info = ResultInfo::failure(code, ResultSource::Precondition);
            ctx.emit_unit(child, UnitState::Skipped, &info);
            let mut record = UnitRecord::new(child, UnitState::Skipped, info);
            record.children = skip_children(ctx, child, Some(code));
            Some(record)
        })
        .collect()
}

type Completion = (usize, UnitRecord);

/// Schedule one level of sibling units to completion
pub(crate) fn run_level(
    ctx: &RunContext<'_>,
    units: &[ConfigurationUnit],
) -> Result<Vec<Option<UnitRecord>>, rayon::ThreadPoolBuildError> {
    if units.is_empty() {
        return Ok(Vec::new());
    }

    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.jobs)
        .thread_name(|i| format!("configuration-worker-{i}"))
        .build()?;

    let graph = DependencyGraph::build(units);
    let mut level = Level::new(ctx, units, &graph);
    level.report_structural_failures();

    let (tx, rx) = crossbeam_channel::unbounded();
    workers.in_place_scope(|scope| {
        for phase in Intent::PHASES {
            level.run_phase(phase, scope, &tx, &rx);
        }
    });
    level.skip_remaining();

    Ok(level.records)
}

struct Level<'r, 'a> {
    ctx: &'r RunContext<'a>,
    units: &'r [ConfigurationUnit],
    graph: &'r DependencyGraph,
    states: Vec<UnitState>,
    records: Vec<Option<UnitRecord>>,
    in_flight: usize,
}

impl<'r, 'a> Level<'r, 'a> {
    fn new(ctx: &'r RunContext<'a>, units: &'r [ConfigurationUnit], graph: &'r DependencyGraph) -> Self {
        let states = graph
            .nodes
            .iter()
            .map(|n| if n.excluded { UnitState::Unknown } else { UnitState::Pending })
            .collect();

        Self {
            ctx,
            units,
            graph,
            states,
            records: vec![None; units.len()],
            in_flight: 0,
        }
    }

    fn report_structural_failures(&mut self) {
        let graph = self.graph;
        for (index, failure) in graph.failures() {
            self.finish(index, UnitState::Failed, failure.clone());
        }
    }

    fn run_phase<'s>(
        &mut self,
        phase: Intent,
        scope: &rayon::Scope<'s>,
        tx: &Sender<Completion>,
        rx: &Receiver<Completion>,
    ) where
        'r: 's,
    {
        loop {
            self.dispatch_ready(phase, scope, tx);
            if self.in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok((index, record)) => self.complete(index, record),
                Err(_) => break,
            }
        }
    }

    /// Move every ready unit of `phase` forward until nothing changes or
    /// all workers are busy
    fn dispatch_ready<'s>(&mut self, phase: Intent, scope: &rayon::Scope<'s>, tx: &Sender<Completion>)
    where
        'r: 's,
    {
        loop {
            let mut progressed = false;
            for index in 0..self.units.len() {
                if self.in_flight >= self.ctx.jobs || self.ctx.halt_reason().is_some() {
                    return;
                }
                if self.states[index] != UnitState::Pending
                    || self.units[index].intent != phase
                    || !self.is_ready(index)
                {
                    continue;
                }

                progressed = true;
                if let Some(failure) = self.dependency_failure(index) {
                    self.finish(index, UnitState::Skipped, failure);
                } else if !self.units[index].should_apply {
                    log::info!("skipping {} by request", self.units[index].to_ref());
                    self.finish(
                        index,
                        UnitState::Skipped,
                        ResultInfo::failure(ErrorCode::ManuallySkipped, ResultSource::Precondition),
                    );
                } else {
                    self.dispatch(index, scope, tx);
                }
            }
            if !progressed {
                return;
            }
        }
    }

    fn is_settled(&self, index: usize) -> bool {
        self.graph.nodes[index].excluded || self.states[index].is_terminal()
    }

    fn is_ready(&self, index: usize) -> bool {
        self.graph.nodes[index]
            .dependencies
            .iter()
            .all(|&d| self.is_settled(d))
    }

    /// The first dependency that did not complete, as a skip reason
    fn dependency_failure(&self, index: usize) -> Option<ResultInfo> {
        self.graph.nodes[index]
            .dependencies
            .iter()
            .find(|&&d| self.graph.nodes[d].excluded || self.states[d] != UnitState::Completed)
            .map(|&d| {
                log::info!(
                    "skipping {}: dependency {} did not complete",
                    self.units[index].to_ref(),
                    self.units[d].identifier
                );
                ResultInfo::failure(ErrorCode::DependencyUnsatisfied, ResultSource::Precondition)
                    .with_details(self.units[d].identifier.clone())
            })
    }

    fn dispatch<'s>(&mut self, index: usize, scope: &rayon::Scope<'s>, tx: &Sender<Completion>)
    where
        'r: 's,
    {
        let units = self.units;
        let unit = &units[index];
        let ctx = self.ctx;

        self.states[index] = UnitState::InProgress;
        ctx.emit_unit(unit, UnitState::InProgress, &ResultInfo::success());
        self.in_flight += 1;

        let tx = tx.clone();
        scope.spawn(move |_| {
            let record = panic::catch_unwind(AssertUnwindSafe(|| executor::run_unit(ctx, unit)))
                .unwrap_or_else(|_| {
                    log::error!("processing {} panicked", unit.to_ref());
                    let mut record = UnitRecord::new(
                        unit,
                        UnitState::Failed,
                        ResultInfo::failure(ErrorCode::Unexpected, ResultSource::Internal)
                            .with_description("the processor panicked"),
                    );
                    record.children = skip_children(ctx, unit, Some(ErrorCode::Unexpected));
                    record
                });
            // The coordinator outlives every task in the scope
            let _ = tx.send((index, record));
        });
    }

    fn complete(&mut self, index: usize, record: UnitRecord) {
        self.in_flight -= 1;
        let unit = &self.units[index];
        let state = record.result.state;

        self.ctx.emit_unit(unit, state, &record.result.result);
        if unit.intent == Intent::Assert && state == UnitState::Failed {
            log::warn!("assertion {} failed, remaining units will be skipped", unit.to_ref());
            self.ctx.abort();
        }

        self.states[index] = state;
        self.records[index] = Some(record);
    }

    /// Terminal transition without running the unit
    fn finish(&mut self, index: usize, state: UnitState, result: ResultInfo) {
        let unit = &self.units[index];
        self.ctx.emit_unit(unit, state, &result);

        let cause = result.code;
        let mut record = UnitRecord::new(unit, state, result);
        record.children = skip_children(self.ctx, unit, cause);

        self.states[index] = state;
        self.records[index] = Some(record);
    }

    fn skip_remaining(&mut self) {
        let code = self
            .ctx
            .halt_reason()
            .unwrap_or(ErrorCode::DependencyUnsatisfied);
        for index in 0..self.units.len() {
            if self.states[index] == UnitState::Pending {
                self.finish(
                    index,
                    UnitState::Skipped,
                    ResultInfo::failure(code, ResultSource::Precondition),
                );
            }
        }
    }
}
