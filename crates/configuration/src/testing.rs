//! Scriptable in-memory processor for engine tests

use crate::error::ProcessorError;
use crate::lock_unpoisoned;
use crate::processor::{
    ApplySettingsResult, GroupProcessor, SetProcessor, SetProcessorFactory, UnitProcessor,
};
use crate::set::ConfigurationSet;
use crate::types::{ResultInfo, TestOutcome, UnitResult, UnitState, UnitTestResult};
use crate::unit::{ConfigurationUnit, SecurityContext, UnitEnvironment, fold_identifier};
use crate::value::ValueMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Test,
    Apply,
    GetAll,
    ApplyGroup,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Scripted responses for one identifier
#[derive(Clone)]
pub struct Behavior {
    pub create: Option<ProcessorError>,
    pub get: Result<ValueMap, ProcessorError>,
    pub test: Result<bool, ProcessorError>,
    pub apply: Result<ApplySettingsResult, ProcessorError>,
    pub get_all: Result<Vec<ValueMap>, ProcessorError>,
    /// Expose the group capability on the unit processor
    pub group: bool,
    /// Held inside every call, to observe concurrency
    pub delay: Duration,
    /// Runs at the start of `test_settings`
    pub on_test: Option<Hook>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            create: None,
            get: Ok(ValueMap::new()),
            test: Ok(true),
            apply: Ok(ApplySettingsResult::default()),
            get_all: Ok(Vec::new()),
            group: false,
            delay: Duration::ZERO,
            on_test: None,
        }
    }
}

impl Behavior {
    pub fn in_desired_state(in_state: bool) -> Self {
        Self {
            test: Ok(in_state),
            ..Self::default()
        }
    }

    pub fn test_error() -> Self {
        Self {
            test: Err(invocation("test failed")),
            ..Self::default()
        }
    }
}

pub fn invocation(message: &str) -> ProcessorError {
    ProcessorError::Invocation {
        code: crate::ErrorCode::Unexpected,
        message: message.to_string(),
    }
}

#[derive(Default)]
struct MockState {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, Operation)>>,
    failing_contexts: Mutex<Vec<SecurityContext>>,
    set_processors_created: AtomicUsize,
    set_group: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockState {
    fn behavior(&self, identifier: &str) -> Behavior {
        lock_unpoisoned(&self.behaviors)
            .get(&fold_identifier(identifier))
            .cloned()
            .unwrap_or_default()
    }

    fn record<T>(&self, identifier: &str, operation: Operation, delay: Duration, f: impl FnOnce() -> T) -> T {
        lock_unpoisoned(&self.calls).push((fold_identifier(identifier), operation));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let result = f();
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Factory producing scripted processors; clones share state
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, identifier: &str, behavior: Behavior) -> Self {
        lock_unpoisoned(&self.state.behaviors).insert(fold_identifier(identifier), behavior);
        self
    }

    pub fn fail_environment(self, context: SecurityContext) -> Self {
        lock_unpoisoned(&self.state.failing_contexts).push(context);
        self
    }

    /// Expose the group capability on set processors
    pub fn with_set_group(self) -> Self {
        self.state.set_group.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self, identifier: &str, operation: Operation) -> usize {
        let folded = fold_identifier(identifier);
        lock_unpoisoned(&self.state.calls)
            .iter()
            .filter(|(id, op)| *id == folded && *op == operation)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock_unpoisoned(&self.state.calls).len()
    }

    /// Identifiers in the order their first call started
    pub fn call_order(&self, operation: Operation) -> Vec<String> {
        let mut order = Vec::new();
        for (id, op) in lock_unpoisoned(&self.state.calls).iter() {
            if *op == operation && !order.contains(id) {
                order.push(id.clone());
            }
        }
        order
    }

    pub fn set_processors_created(&self) -> usize {
        self.state.set_processors_created.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }
}

impl SetProcessorFactory for MockFactory {
    fn create_set_processor(
        &self,
        set: &ConfigurationSet,
        environment: &UnitEnvironment,
    ) -> Result<Arc<dyn SetProcessor>, ProcessorError> {
        self.state.set_processors_created.fetch_add(1, Ordering::SeqCst);
        if lock_unpoisoned(&self.state.failing_contexts).contains(&environment.context) {
            return Err(ProcessorError::Creation(format!(
                "{} environment unavailable",
                environment.context.as_str()
            )));
        }
        Ok(Arc::new(MockSetProcessor {
            state: Arc::clone(&self.state),
            units: set.units.clone(),
            group: self.state.set_group.load(Ordering::SeqCst),
        }))
    }
}

struct MockSetProcessor {
    state: Arc<MockState>,
    units: Vec<ConfigurationUnit>,
    group: bool,
}

impl SetProcessor for MockSetProcessor {
    fn create_unit_processor(
        &self,
        unit: &ConfigurationUnit,
    ) -> Result<Box<dyn UnitProcessor>, ProcessorError> {
        let behavior = self.state.behavior(&unit.identifier);
        if let Some(e) = behavior.create.clone() {
            return Err(e);
        }
        Ok(Box::new(MockUnitProcessor {
            state: Arc::clone(&self.state),
            unit: unit.clone(),
            behavior,
        }))
    }

    fn as_group(&self) -> Option<&dyn GroupProcessor> {
        if self.group { Some(self) } else { None }
    }
}

impl GroupProcessor for MockSetProcessor {
    fn apply_group(&self) -> Result<Vec<UnitResult>, ProcessorError> {
        self.state.record("", Operation::ApplyGroup, Duration::ZERO, || {
            Ok(self
                .units
                .iter()
                .filter(|u| u.is_active)
                .map(completed)
                .collect())
        })
    }

    fn test_group(&self) -> Result<Vec<UnitTestResult>, ProcessorError> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.is_active)
            .map(|u| UnitTestResult {
                unit: u.to_ref(),
                outcome: TestOutcome::Positive,
                result: ResultInfo::success(),
            })
            .collect())
    }
}

fn completed(unit: &ConfigurationUnit) -> UnitResult {
    UnitResult {
        unit: unit.to_ref(),
        state: UnitState::Completed,
        previously_in_desired_state: false,
        reboot_required: false,
        result: ResultInfo::success(),
    }
}

struct MockUnitProcessor {
    state: Arc<MockState>,
    unit: ConfigurationUnit,
    behavior: Behavior,
}

impl UnitProcessor for MockUnitProcessor {
    fn get_settings(&self) -> Result<ValueMap, ProcessorError> {
        self.state
            .record(&self.unit.identifier, Operation::Get, self.behavior.delay, || {
                self.behavior.get.clone()
            })
    }

    fn test_settings(&self) -> Result<bool, ProcessorError> {
        if let Some(hook) = &self.behavior.on_test {
            hook();
        }
        self.state
            .record(&self.unit.identifier, Operation::Test, self.behavior.delay, || {
                self.behavior.test.clone()
            })
    }

    fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError> {
        self.state
            .record(&self.unit.identifier, Operation::Apply, self.behavior.delay, || {
                self.behavior.apply.clone()
            })
    }

    fn get_all_settings(&self) -> Result<Vec<ValueMap>, ProcessorError> {
        self.state
            .record(&self.unit.identifier, Operation::GetAll, self.behavior.delay, || {
                self.behavior.get_all.clone()
            })
    }

    fn as_group(&self) -> Option<&dyn GroupProcessor> {
        if self.behavior.group { Some(self) } else { None }
    }
}

impl GroupProcessor for MockUnitProcessor {
    fn apply_group(&self) -> Result<Vec<UnitResult>, ProcessorError> {
        self.state
            .record(&self.unit.identifier, Operation::ApplyGroup, Duration::ZERO, || {
                let mut results: Vec<UnitResult> = self
                    .unit
                    .units
                    .iter()
                    .filter(|u| u.is_active)
                    .map(completed)
                    .collect();
                results.push(completed(&self.unit));
                Ok(results)
            })
    }

    fn test_group(&self) -> Result<Vec<UnitTestResult>, ProcessorError> {
        let mut results: Vec<UnitTestResult> = self
            .unit
            .units
            .iter()
            .filter(|u| u.is_active)
            .map(|u| UnitTestResult {
                unit: u.to_ref(),
                outcome: TestOutcome::Positive,
                result: ResultInfo::success(),
            })
            .collect();
        results.push(UnitTestResult {
            unit: self.unit.to_ref(),
            outcome: TestOutcome::Positive,
            result: ResultInfo::success(),
        });
        Ok(results)
    }
}
