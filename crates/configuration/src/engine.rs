//! The configuration processor: entry point for opening, applying and
//! testing sets

use crate::aggregate;
use crate::cancel::CancellationToken;
use crate::document;
use crate::environment::EnvironmentPool;
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, EventEmitter, ProgressObserver};
use crate::executor;
use crate::graph::DependencyGraph;
use crate::history::HistoryStore;
use crate::lock_unpoisoned;
use crate::processor::SetProcessorFactory;
use crate::scheduler::{self, RunContext, UnitRecord};
use crate::set::ConfigurationSet;
use crate::types::{
    ApplyFlags, ApplySetResult, GetAllSettingsResult, GetSettingsResult, ResultInfo, ResultSource,
    SetState, TestOutcome, TestSetResult, UnitResult, UnitState, UnitTestResult,
};
use crate::unit::ConfigurationUnit;
use chrono::Utc;
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Default number of concurrent unit operations
pub const DEFAULT_JOBS: usize = 4;

/// Opens, applies and tests configuration sets against a processor backend.
///
/// Clones share the backend, the progress observers and the apply lock, so
/// applies started from any clone are sequenced.
#[derive(Clone)]
pub struct ConfigurationProcessor {
    factory: Arc<dyn SetProcessorFactory>,
    emitter: Arc<EventEmitter>,
    apply_lock: Arc<Mutex<()>>,
    jobs: usize,
    history: Option<Arc<HistoryStore>>,
}

impl ConfigurationProcessor {
    pub fn new(factory: Arc<dyn SetProcessorFactory>) -> Self {
        Self {
            factory,
            emitter: Arc::new(EventEmitter::new()),
            apply_lock: Arc::new(Mutex::new(())),
            jobs: DEFAULT_JOBS,
            history: None,
        }
    }

    /// Maximum number of units processed at once
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Record every completed apply in `history`
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(Arc::new(history));
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_deref()
    }

    /// Observe progress of every operation started after this call
    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.emitter.add_observer(observer);
    }

    /// Channel receiving progress of every operation started after this call
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.emitter.subscribe()
    }

    /// Parse a configuration document
    pub fn open_set(&self, input: &str) -> Result<ConfigurationSet> {
        Ok(document::open_set(input)?)
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Apply `set`, blocking until every unit reached a terminal state.
    ///
    /// The set state, apply timestamps and unit runtime fields are written
    /// back into `set` once the run finishes; `apply_begun` is the time the
    /// run started. Observe progress during the run through events.
    pub fn apply_set(&self, set: &mut ConfigurationSet, flags: ApplyFlags) -> Result<ApplySetResult> {
        self.apply_with(set, flags, &self.emitter, &CancellationToken::new())
    }

    /// Apply `set` on a background thread.
    ///
    /// The returned handle carries the operation's own progress channel and
    /// cancellation token; processor-level observers see the same events.
    pub fn apply_set_async(&self, mut set: ConfigurationSet, flags: ApplyFlags) -> ApplyOperation {
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new();
        let events = emitter.subscribe();
        emitter.add_observer(Arc::new(Forward(Arc::clone(&self.emitter))));

        let processor = self.clone();
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            let result = processor.apply_with(&mut set, flags, &emitter, &token);
            (set, result)
        });

        ApplyOperation {
            cancel,
            events,
            handle,
        }
    }

    fn apply_with(
        &self,
        set: &mut ConfigurationSet,
        flags: ApplyFlags,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ApplySetResult> {
        if flags.consistency_check_only {
            return Ok(check_consistency(set));
        }

        let _guard = match self.apply_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::info!("Waiting for another apply to finish before applying {}", set.instance_id);
                emitter.set_state(set.instance_id, SetState::Pending);
                lock_unpoisoned(&self.apply_lock)
            }
        };

        // `set` is borrowed by the run; its runtime fields are written afterwards
        let begun = Utc::now();
        let records = self.run_set(set, emitter, cancel)?;
        emitter.set_state(set.instance_id, SetState::Completed);

        let unit_results = scheduler::flatten(&records);
        let result_code = aggregate::result_code(&unit_results);

        set.begin_apply(begun);
        for result in &unit_results {
            if let Some(unit) = set.find_unit_mut(result.unit.instance_id) {
                unit.state = result.state;
                unit.result = result.result.clone();
                unit.previously_in_desired_state = result.previously_in_desired_state;
                unit.reboot_required = result.reboot_required;
            }
        }
        set.end_apply(Utc::now());

        match result_code {
            None => log::info!("Applied set {} ({} units)", set.instance_id, unit_results.len()),
            Some(code) => log::warn!("Applying set {} finished with {code}", set.instance_id),
        }

        if let Some(history) = &self.history {
            if let Err(e) = history.record(set) {
                log::warn!("Failed to record set {} in history: {e}", set.instance_id);
            }
        }

        Ok(ApplySetResult {
            unit_results,
            result_code,
        })
    }

    fn run_set(
        &self,
        set: &ConfigurationSet,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<UnitRecord>>> {
        let pool = EnvironmentPool::new(self.factory.as_ref(), set).map_err(Error::ProcessorCreation)?;
        emitter.set_state(set.instance_id, SetState::InProgress);

        let ctx = RunContext::new(&pool, emitter, cancel, set.instance_id, &set.environment, self.jobs);

        let Some(group) = pool.default_processor().as_group() else {
            return Ok(scheduler::run_level(&ctx, &set.units)?);
        };

        log::debug!("Delegating set {} to the set processor", set.instance_id);
        Ok(match group.apply_group() {
            Ok(results) => {
                let mut by_id = executor::index_results(results);
                executor::records_from_results(&ctx, &set.units, &mut by_id)
            }
            Err(e) => {
                log::warn!("Set processor failed to apply {}: {e}", set.instance_id);
                fail_units(&ctx, &set.units, &e.into_result_info(ResultSource::UnitProcessing))
            }
        })
    }

    // ========================================================================
    // Test and get
    // ========================================================================

    /// Test every active unit without changing the system
    pub fn test_set(&self, set: &ConfigurationSet) -> Result<TestSetResult> {
        let pool = EnvironmentPool::new(self.factory.as_ref(), set).map_err(Error::ProcessorCreation)?;

        let unit_results = if let Some(group) = pool.default_processor().as_group() {
            match group.test_group() {
                Ok(results) => {
                    let mut by_id: HashMap<Uuid, UnitTestResult> =
                        results.into_iter().map(|r| (r.unit.instance_id, r)).collect();
                    let mut ordered = Vec::new();
                    executor::order_test_results(&set.units, &mut by_id, &mut ordered);
                    ordered
                }
                Err(e) => {
                    let info = e.into_result_info(ResultSource::UnitProcessing);
                    let mut failed = Vec::new();
                    fail_tests(&set.units, &info, &mut failed);
                    failed
                }
            }
        } else {
            let workers = rayon::ThreadPoolBuilder::new()
                .num_threads(self.jobs)
                .thread_name(|i| format!("configuration-test-{i}"))
                .build()?;
            workers.install(|| executor::test_units(&pool, &set.environment, &set.units))
        };

        let outcome = aggregate::test_outcome(&unit_results);
        log::info!("Tested set {}: {outcome:?}", set.instance_id);
        Ok(TestSetResult {
            unit_results,
            outcome,
        })
    }

    /// Read the current settings of one unit
    pub fn get_unit_settings(&self, set: &ConfigurationSet, unit: &ConfigurationUnit) -> Result<GetSettingsResult> {
        ensure_member(set, unit)?;
        let pool = EnvironmentPool::new(self.factory.as_ref(), set).map_err(Error::ProcessorCreation)?;
        let environment = unit.effective_environment(&set.environment);

        let (settings, result) = match pool.get(environment).and_then(|p| p.create_unit_processor(unit)) {
            Err(e) => (None, e.into_result_info(ResultSource::Internal)),
            Ok(processor) => match processor.get_settings() {
                Ok(settings) => (Some(settings), ResultInfo::success()),
                Err(e) => (None, e.into_result_info(ResultSource::UnitProcessing)),
            },
        };
        Ok(GetSettingsResult {
            unit: unit.to_ref(),
            settings,
            result,
        })
    }

    /// Enumerate every instance of the unit's resource on the system
    pub fn get_all_unit_settings(
        &self,
        set: &ConfigurationSet,
        unit: &ConfigurationUnit,
    ) -> Result<GetAllSettingsResult> {
        ensure_member(set, unit)?;
        let pool = EnvironmentPool::new(self.factory.as_ref(), set).map_err(Error::ProcessorCreation)?;
        let environment = unit.effective_environment(&set.environment);

        let (settings, result) = match pool.get(environment).and_then(|p| p.create_unit_processor(unit)) {
            Err(e) => (Vec::new(), e.into_result_info(ResultSource::Internal)),
            Ok(processor) => match processor.get_all_settings() {
                Ok(settings) => (settings, ResultInfo::success()),
                Err(e) => (Vec::new(), e.into_result_info(ResultSource::UnitProcessing)),
            },
        };
        Ok(GetAllSettingsResult {
            unit: unit.to_ref(),
            settings,
            result,
        })
    }
}

/// Forwards an operation's events to the processor-level emitter
struct Forward(Arc<EventEmitter>);

impl ProgressObserver for Forward {
    fn on_change(&self, event: &ChangeEvent) {
        self.0.emit(event.clone());
    }
}

fn ensure_member(set: &ConfigurationSet, unit: &ConfigurationUnit) -> Result<()> {
    if set.find_unit(unit.instance_id).is_none() {
        return Err(Error::InvalidArgument(format!(
            "unit {} is not part of set {}",
            unit.to_ref(),
            set.instance_id
        )));
    }
    Ok(())
}

/// Validate every level of `set` without creating processors
fn check_consistency(set: &ConfigurationSet) -> ApplySetResult {
    fn check_level(units: &[ConfigurationUnit], out: &mut Vec<UnitResult>) {
        let graph = DependencyGraph::build(units);
        for (unit, node) in units.iter().zip(&graph.nodes) {
            if node.excluded {
                continue;
            }
            let (state, result) = match &node.failure {
                Some(failure) => (UnitState::Failed, failure.clone()),
                None => (UnitState::Pending, ResultInfo::success()),
            };
            out.push(UnitResult {
                unit: unit.to_ref(),
                state,
                previously_in_desired_state: false,
                reboot_required: false,
                result,
            });
            check_level(&unit.units, out);
        }
    }

    let mut unit_results = Vec::new();
    check_level(&set.units, &mut unit_results);

    let failures: Vec<UnitResult> = unit_results
        .iter()
        .filter(|r| r.state == UnitState::Failed)
        .cloned()
        .collect();
    ApplySetResult {
        result_code: aggregate::result_code(&failures),
        unit_results,
    }
}

fn fail_units(ctx: &RunContext<'_>, units: &[ConfigurationUnit], info: &ResultInfo) -> Vec<Option<UnitRecord>> {
    units
        .iter()
        .map(|unit| {
            if !unit.is_active {
                return None;
            }
            ctx.emit_unit(unit, UnitState::Failed, info);
            let mut record = UnitRecord::new(unit, UnitState::Failed, info.clone());
            record.children = fail_units(ctx, &unit.units, info);
            Some(record)
        })
        .collect()
}

fn fail_tests(units: &[ConfigurationUnit], info: &ResultInfo, out: &mut Vec<UnitTestResult>) {
    for unit in units.iter().filter(|u| u.is_active) {
        out.push(UnitTestResult {
            unit: unit.to_ref(),
            outcome: TestOutcome::Failed,
            result: info.clone(),
        });
        fail_tests(&unit.units, info, out);
    }
}

// ============================================================================
// Background operations
// ============================================================================

/// Handle to an apply running on a background thread
pub struct ApplyOperation {
    cancel: CancellationToken,
    events: Receiver<ChangeEvent>,
    handle: JoinHandle<(ConfigurationSet, Result<ApplySetResult>)>,
}

impl ApplyOperation {
    /// Stop dispatching new units; units already running finish normally
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress of this operation only
    pub fn progress(&self) -> &Receiver<ChangeEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation, returning the updated set and its result
    pub fn join(self) -> Result<(ConfigurationSet, ApplySetResult)> {
        let (set, result) = self.handle.join().map_err(|_| Error::OperationPanicked)?;
        result.map(|r| (set, r))
    }
}
