//! Processing of a single unit
//!
//! Chooses Test / Get / Set by intent, applies the idempotency short-circuit
//! and classifies failures. Also holds the test-only flow and the mapping of
//! group processor results back onto units.

use crate::aggregate;
use crate::cancel::CancellationToken;
use crate::environment::EnvironmentPool;
use crate::error::{ErrorCode, ProcessorError};
use crate::processor::{GroupProcessor, UnitProcessor};
use crate::scheduler::{self, RunContext, UnitRecord};
use crate::types::{
    Intent, ResultInfo, ResultSource, TestOutcome, UnitResult, UnitState, UnitTestResult,
};
use crate::unit::{ConfigurationUnit, UnitEnvironment};
use rayon::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of a successful unit
#[derive(Debug, Default)]
struct Applied {
    previously_in_desired_state: bool,
    reboot_required: bool,
}

/// Process one dispatched unit (and, for groups, its children)
pub(crate) fn run_unit(ctx: &RunContext<'_>, unit: &ConfigurationUnit) -> UnitRecord {
    if ctx.cancel.is_cancelled() {
        return not_run(ctx, unit, ErrorCode::OperationCancelled);
    }

    let environment = unit.effective_environment(ctx.default_environment);
    let processor = match create_unit_processor(ctx.pool, environment, unit) {
        Ok(processor) => processor,
        Err(e) => {
            log::warn!("could not create a processor for {}: {e}", unit.to_ref());
            return failed(ctx, unit, e.into_result_info(ResultSource::Internal));
        }
    };

    if ctx.cancel.is_cancelled() {
        return not_run(ctx, unit, ErrorCode::OperationCancelled);
    }

    if unit.is_group {
        if let Some(group) = processor.as_group() {
            log::debug!("delegating group {} to its processor", unit.to_ref());
            return apply_group(ctx, unit, group);
        }
    }

    log::debug!("processing {} ({})", unit.to_ref(), unit.intent);
    let mut record = match process_intent(processor.as_ref(), unit, ctx.cancel) {
        Ok(None) => {
            log::info!("{} cancelled before applying", unit.to_ref());
            return not_run(ctx, unit, ErrorCode::OperationCancelled);
        }
        Ok(Some(applied)) => {
            let mut record = UnitRecord::new(unit, UnitState::Completed, ResultInfo::success());
            record.result.previously_in_desired_state = applied.previously_in_desired_state;
            record.result.reboot_required = applied.reboot_required;
            record
        }
        Err(info) => {
            log::warn!("{} failed: {}", unit.to_ref(), info.description);
            UnitRecord::new(unit, UnitState::Failed, info)
        }
    };

    if unit.is_group {
        if record.result.state == UnitState::Completed {
            run_children(ctx, unit, &mut record);
        } else {
            record.children = scheduler::skip_children(ctx, unit, record.result.result.code);
        }
    }
    record
}

fn create_unit_processor(
    pool: &EnvironmentPool<'_>,
    environment: &UnitEnvironment,
    unit: &ConfigurationUnit,
) -> Result<Box<dyn UnitProcessor>, ProcessorError> {
    pool.get(environment)?.create_unit_processor(unit)
}

/// `Ok(None)` when cancellation arrived before the unit was changed
fn process_intent(
    processor: &dyn UnitProcessor,
    unit: &ConfigurationUnit,
    cancel: &CancellationToken,
) -> Result<Option<Applied>, ResultInfo> {
    let processing_error = |e: ProcessorError| e.into_result_info(ResultSource::UnitProcessing);

    match unit.intent {
        Intent::Assert => match processor.test_settings() {
            Ok(true) => Ok(Some(Applied::default())),
            Ok(false) => Err(
                ResultInfo::failure(ErrorCode::AssertionFailed, ResultSource::Precondition)
                    .with_details("the system is not in the asserted state"),
            ),
            Err(e) => Err(processing_error(e)),
        },
        Intent::Inform => processor
            .get_settings()
            .map(|_| Some(Applied::default()))
            .map_err(processing_error),
        Intent::Apply => {
            if processor.test_settings().map_err(processing_error)? {
                log::debug!("{} already in desired state", unit.to_ref());
                return Ok(Some(Applied {
                    previously_in_desired_state: true,
                    reboot_required: false,
                }));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let applied = processor.apply_settings().map_err(processing_error)?;
            Ok(Some(Applied {
                previously_in_desired_state: false,
                reboot_required: applied.reboot_required,
            }))
        }
    }
}

fn run_children(ctx: &RunContext<'_>, unit: &ConfigurationUnit, record: &mut UnitRecord) {
    match scheduler::run_level(ctx, &unit.units) {
        Ok(children) => {
            let child_results = scheduler::flatten(&children);
            if let Some(code) = aggregate::result_code(&child_results) {
                record.result.state = UnitState::Failed;
                record.result.result = ResultInfo::failure(code, ResultSource::ConfigurationSet)
                    .with_details("one or more child units did not succeed");
            }
            record.children = children;
        }
        Err(e) => {
            log::error!("could not start workers for group {}: {e}", unit.to_ref());
            record.result.state = UnitState::Failed;
            record.result.result = ResultInfo::failure(ErrorCode::Unexpected, ResultSource::Internal)
                .with_description(e.to_string());
            record.children = scheduler::skip_children(ctx, unit, Some(ErrorCode::Unexpected));
        }
    }
}

fn not_run(ctx: &RunContext<'_>, unit: &ConfigurationUnit, code: ErrorCode) -> UnitRecord {
    let info = ResultInfo::failure(code, ResultSource::Precondition);
    let mut record = UnitRecord::new(unit, UnitState::Skipped, info);
    record.children = scheduler::skip_children(ctx, unit, Some(code));
    record
}

fn failed(ctx: &RunContext<'_>, unit: &ConfigurationUnit, info: ResultInfo) -> UnitRecord {
    let cause = info.code;
    let mut record = UnitRecord::new(unit, UnitState::Failed, info);
    record.children = scheduler::skip_children(ctx, unit, cause);
    record
}

// ============================================================================
// Group processors
// ============================================================================

fn apply_group(ctx: &RunContext<'_>, unit: &ConfigurationUnit, group: &dyn GroupProcessor) -> UnitRecord {
    match group.apply_group() {
        Ok(results) => {
            let mut by_id = index_results(results);
            let children = records_from_results(ctx, &unit.units, &mut by_id);
            let own = by_id
                .remove(&unit.instance_id)
                .unwrap_or_else(|| missing_result(unit));
            UnitRecord {
                result: UnitResult {
                    unit: unit.to_ref(),
                    ..own
                },
                children,
            }
        }
        Err(e) => failed(ctx, unit, e.into_result_info(ResultSource::UnitProcessing)),
    }
}

pub(crate) fn index_results(results: Vec<UnitResult>) -> HashMap<Uuid, UnitResult> {
    results
        .into_iter()
        .map(|r| (r.unit.instance_id, r))
        .collect()
}

/// Map results reported by a group processor onto `units`, emitting one
/// terminal event per unit
pub(crate) fn records_from_results(
    ctx: &RunContext<'_>,
    units: &[ConfigurationUnit],
    by_id: &mut HashMap<Uuid, UnitResult>,
) -> Vec<Option<UnitRecord>> {
    units
        .iter()
        .map(|unit| {
            if !unit.is_active {
                return None;
            }
            let reported = by_id
                .remove(&unit.instance_id)
                .unwrap_or_else(|| missing_result(unit));
            let result = UnitResult {
                unit: unit.to_ref(),
                ..reported
            };
            ctx.emit_unit(unit, result.state, &result.result);
            let children = records_from_results(ctx, &unit.units, by_id);
            Some(UnitRecord { result, children })
        })
        .collect()
}

fn missing_result(unit: &ConfigurationUnit) -> UnitResult {
    log::warn!("group processor reported no result for {}", unit.to_ref());
    UnitResult {
        unit: unit.to_ref(),
        state: UnitState::Failed,
        previously_in_desired_state: false,
        reboot_required: false,
        result: ResultInfo::failure(ErrorCode::Unexpected, ResultSource::Internal)
            .with_description("the group processor reported no result for this unit"),
    }
}

// ============================================================================
// Test flow
// ============================================================================

/// Test every active unit in parallel; results are depth-first in document order
pub(crate) fn test_units(
    pool: &EnvironmentPool<'_>,
    default_environment: &UnitEnvironment,
    units: &[ConfigurationUnit],
) -> Vec<UnitTestResult> {
    units
        .par_iter()
        .map(|unit| {
            if unit.is_active {
                test_unit(pool, default_environment, unit)
            } else {
                Vec::new()
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

fn test_unit(
    pool: &EnvironmentPool<'_>,
    default_environment: &UnitEnvironment,
    unit: &ConfigurationUnit,
) -> Vec<UnitTestResult> {
    let mut results = Vec::new();

    if unit.intent == Intent::Inform || !unit.should_apply {
        results.push(test_result(unit, TestOutcome::NotRun, ResultInfo::success()));
    } else {
        let environment = unit.effective_environment(default_environment);
        match create_unit_processor(pool, environment, unit) {
            Err(e) => results.push(test_result(
                unit,
                TestOutcome::Failed,
                e.into_result_info(ResultSource::Internal),
            )),
            Ok(processor) => {
                if unit.is_group {
                    if let Some(group) = processor.as_group() {
                        return test_group(unit, group);
                    }
                }
                results.push(match processor.test_settings() {
                    Ok(true) => test_result(unit, TestOutcome::Positive, ResultInfo::success()),
                    Ok(false) => test_result(unit, TestOutcome::Negative, ResultInfo::success()),
                    Err(e) => test_result(
                        unit,
                        TestOutcome::Failed,
                        e.into_result_info(ResultSource::UnitProcessing),
                    ),
                });
            }
        }
    }

    if unit.is_group {
        results.extend(test_units(pool, default_environment, &unit.units));
    }
    results
}

fn test_group(unit: &ConfigurationUnit, group: &dyn GroupProcessor) -> Vec<UnitTestResult> {
    match group.test_group() {
        Ok(results) => {
            let mut by_id: HashMap<Uuid, UnitTestResult> = results
                .into_iter()
                .map(|r| (r.unit.instance_id, r))
                .collect();
            let mut ordered = Vec::new();
            order_test_results(std::slice::from_ref(unit), &mut by_id, &mut ordered);
            ordered
        }
        Err(e) => vec![test_result(
            unit,
            TestOutcome::Failed,
            e.into_result_info(ResultSource::UnitProcessing),
        )],
    }
}

/// Arrange group test results depth-first in document order
pub(crate) fn order_test_results(
    units: &[ConfigurationUnit],
    by_id: &mut HashMap<Uuid, UnitTestResult>,
    out: &mut Vec<UnitTestResult>,
) {
    for unit in units.iter().filter(|u| u.is_active) {
        let result = by_id.remove(&unit.instance_id).unwrap_or_else(|| {
            test_result(
                unit,
                TestOutcome::Failed,
                ResultInfo::failure(ErrorCode::TestNotRun, ResultSource::Internal)
                    .with_description("the group processor reported no result for this unit"),
            )
        });
        out.push(UnitTestResult {
            unit: unit.to_ref(),
            ..result
        });
        order_test_results(&unit.units, by_id, out);
    }
}

fn test_result(unit: &ConfigurationUnit, outcome: TestOutcome, result: ResultInfo) -> UnitTestResult {
    UnitTestResult {
        unit: unit.to_ref(),
        outcome,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::events::EventEmitter;
    use crate::processor::ApplySettingsResult;
    use crate::set::ConfigurationSet;
    use crate::testing::{Behavior, MockFactory, Operation, invocation};
    use crate::unit::SecurityContext;

    fn run_single(factory: &MockFactory, unit: ConfigurationUnit) -> UnitRecord {
        let set = ConfigurationSet::new().with_unit(unit);
        let pool = EnvironmentPool::new(factory, &set).unwrap();
        let emitter = EventEmitter::new();
        let cancel = CancellationToken::new();
        let ctx = RunContext::new(&pool, &emitter, &cancel, set.instance_id, &set.environment, 1);
        run_unit(&ctx, &set.units[0])
    }

    fn apply_unit(id: &str) -> ConfigurationUnit {
        ConfigurationUnit::new("Test").with_identifier(id)
    }

    #[test]
    fn test_apply_short_circuits_when_in_desired_state() {
        let factory = MockFactory::new().with("a", Behavior::in_desired_state(true));
        let record = run_single(&factory, apply_unit("a"));

        assert_eq!(record.result.state, UnitState::Completed);
        assert!(record.result.previously_in_desired_state);
        assert_eq!(factory.calls("a", Operation::Test), 1);
        assert_eq!(factory.calls("a", Operation::Apply), 0);
    }

    #[test]
    fn test_apply_sets_when_not_in_desired_state() {
        let factory = MockFactory::new().with(
            "a",
            Behavior {
                test: Ok(false),
                apply: Ok(ApplySettingsResult { reboot_required: true }),
                ..Behavior::default()
            },
        );
        let record = run_single(&factory, apply_unit("a"));

        assert_eq!(record.result.state, UnitState::Completed);
        assert!(!record.result.previously_in_desired_state);
        assert!(record.result.reboot_required);
        assert_eq!(factory.calls("a", Operation::Test), 1);
        assert_eq!(factory.calls("a", Operation::Apply), 1);
    }

    #[test]
    fn test_intent_dispatch_call_counts() {
        let factory = MockFactory::new()
            .with("assert", Behavior::in_desired_state(true))
            .with("inform", Behavior::in_desired_state(false));

        run_single(&factory, apply_unit("assert").with_intent(Intent::Assert));
        run_single(&factory, apply_unit("inform").with_intent(Intent::Inform));

        assert_eq!(factory.calls("assert", Operation::Test), 1);
        assert_eq!(factory.calls("assert", Operation::Get), 0);
        assert_eq!(factory.calls("assert", Operation::Apply), 0);
        assert_eq!(factory.calls("inform", Operation::Get), 1);
        assert_eq!(factory.calls("inform", Operation::Test), 0);
        assert_eq!(factory.calls("inform", Operation::Apply), 0);
    }

    #[test]
    fn test_assert_error_keeps_processor_error() {
        let factory = MockFactory::new().with("assert", Behavior::test_error());
        let record = run_single(&factory, apply_unit("assert").with_intent(Intent::Assert));

        assert_eq!(record.result.state, UnitState::Failed);
        assert_eq!(record.result.result.code, Some(ErrorCode::Unexpected));
        assert_eq!(record.result.result.source, ResultSource::UnitProcessing);
        assert_eq!(record.result.result.description, "test failed");
    }

    #[test]
    fn test_apply_error_is_unit_processing() {
        let factory = MockFactory::new().with(
            "a",
            Behavior {
                test: Ok(false),
                apply: Err(ProcessorError::Invocation {
                    code: ErrorCode::UnitInvokeSet,
                    message: "access denied".into(),
                }),
                ..Behavior::default()
            },
        );
        let record = run_single(&factory, apply_unit("a"));

        assert_eq!(record.result.state, UnitState::Failed);
        assert_eq!(record.result.result.code, Some(ErrorCode::UnitInvokeSet));
        assert_eq!(record.result.result.source, ResultSource::UnitProcessing);
    }

    #[test]
    fn test_unit_processor_creation_error_is_internal() {
        let factory = MockFactory::new().with(
            "a",
            Behavior {
                create: Some(ProcessorError::ResourceNotFound("Test".into())),
                ..Behavior::default()
            },
        );
        let record = run_single(&factory, apply_unit("a"));

        assert_eq!(record.result.state, UnitState::Failed);
        assert_eq!(record.result.result.code, Some(ErrorCode::UnitNotFound));
        assert_eq!(record.result.result.source, ResultSource::Internal);
    }

    #[test]
    fn test_environment_failure_fails_only_that_unit() {
        let factory = MockFactory::new().fail_environment(SecurityContext::Elevated);
        let record = run_single(
            &factory,
            apply_unit("admin").with_environment(UnitEnvironment::with_context(SecurityContext::Elevated)),
        );

        assert_eq!(record.result.state, UnitState::Failed);
        assert_eq!(record.result.result.code, Some(ErrorCode::SetProcessorCreation));
        assert_eq!(record.result.result.source, ResultSource::Internal);
    }

    #[test]
    fn test_group_capability_is_used_for_groups_only() {
        let grouped = Behavior {
            group: true,
            ..Behavior::default()
        };
        let factory = MockFactory::new().with("group", grouped.clone()).with("plain", grouped);

        let record = run_single(
            &factory,
            apply_unit("group").with_units(vec![apply_unit("c1"), apply_unit("c2")]),
        );
        assert_eq!(record.result.state, UnitState::Completed);
        assert_eq!(record.children.iter().flatten().count(), 2);
        assert_eq!(factory.calls("group", Operation::ApplyGroup), 1);
        assert_eq!(factory.calls("c1", Operation::Test), 0);

        let record = run_single(&factory, apply_unit("plain"));
        assert_eq!(record.result.state, UnitState::Completed);
        assert_eq!(factory.calls("plain", Operation::ApplyGroup), 0);
        assert_eq!(factory.calls("plain", Operation::Test), 1);
    }

    #[test]
    fn test_test_units_outcomes() {
        let set = ConfigurationSet::new().with_units(vec![
            apply_unit("positive"),
            apply_unit("negative"),
            apply_unit("broken"),
            apply_unit("info").with_intent(Intent::Inform),
            apply_unit("manual").skipped(),
            apply_unit("off").inactive(),
        ]);
        let factory = MockFactory::new()
            .with("negative", Behavior::in_desired_state(false))
            .with(
                "broken",
                Behavior {
                    test: Err(invocation("no access")),
                    ..Behavior::default()
                },
            );
        let pool = EnvironmentPool::new(&factory, &set).unwrap();
        let results = test_units(&pool, &set.environment, &set.units);

        let outcomes: Vec<(&str, TestOutcome)> = results
            .iter()
            .map(|r| (r.unit.identifier.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("positive", TestOutcome::Positive),
                ("negative", TestOutcome::Negative),
                ("broken", TestOutcome::Failed),
                ("info", TestOutcome::NotRun),
                ("manual", TestOutcome::NotRun),
            ]
        );
        assert_eq!(factory.calls("info", Operation::Test), 0);
        assert_eq!(results[2].result.source, ResultSource::UnitProcessing);
    }
}
