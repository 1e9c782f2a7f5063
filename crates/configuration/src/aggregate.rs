//! Reduction of per-unit outcomes to a single set result code

use crate::error::ErrorCode;
use crate::types::{Intent, TestOutcome, UnitResult, UnitState, UnitTestResult};

/// Lower ranks win
///
/// A dependency cycle is a structural failure and ranks with the other graph
/// errors; a unit skipped because a dependency did not complete only decides
/// the set code when nothing failed outright.
fn rank(code: ErrorCode, state: UnitState) -> u8 {
    match (code, state) {
        (ErrorCode::DuplicateIdentifier, _) => 0,
        (ErrorCode::MissingDependency, _) => 1,
        (ErrorCode::DependencyUnsatisfied, UnitState::Failed) => 2,
        (ErrorCode::AssertionFailed, _) => 3,
        (ErrorCode::OperationCancelled, _) => 4,
        (ErrorCode::DependencyUnsatisfied, _) => 6,
        _ => 5,
    }
}

/// Code a single unit contributes to its set
fn contribution(result: &UnitResult) -> Option<ErrorCode> {
    match result.state {
        UnitState::Completed => None,
        UnitState::Skipped if result.result.code == Some(ErrorCode::ManuallySkipped) => None,
        UnitState::Skipped | UnitState::Failed => Some(match result.result.code {
            Some(
                code @ (ErrorCode::DuplicateIdentifier
                | ErrorCode::MissingDependency
                | ErrorCode::DependencyUnsatisfied
                | ErrorCode::AssertionFailed
                | ErrorCode::OperationCancelled),
            ) => code,
            _ if result.unit.intent == Intent::Assert && result.state == UnitState::Failed => {
                ErrorCode::AssertionFailed
            }
            _ => ErrorCode::SetApplyFailed,
        }),
        // Never ran to a terminal state
        UnitState::Unknown | UnitState::Pending | UnitState::InProgress => Some(ErrorCode::SetApplyFailed),
    }
}

/// Set result code by precedence: DuplicateIdentifier > MissingDependency >
/// dependency cycle > AssertionFailed > OperationCancelled > SetApplyFailed >
/// DependencyUnsatisfied skips
pub fn result_code(results: &[UnitResult]) -> Option<ErrorCode> {
    results
        .iter()
        .filter_map(|r| contribution(r).map(|code| (rank(code, r.state), code)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, code)| code)
}

/// Overall outcome of a test run
pub fn test_outcome(results: &[UnitTestResult]) -> TestOutcome {
    TestOutcome::aggregate(results.iter().map(|r| r.outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResultInfo, ResultSource};
    use crate::unit::ConfigurationUnit;

    fn result(intent: Intent, state: UnitState, code: Option<ErrorCode>) -> UnitResult {
        UnitResult {
            unit: ConfigurationUnit::new("Test").with_intent(intent).to_ref(),
            state,
            previously_in_desired_state: false,
            reboot_required: false,
            result: ResultInfo {
                code,
                source: ResultSource::None,
                ..ResultInfo::default()
            },
        }
    }

    #[test]
    fn test_all_completed_is_success() {
        let results = vec![
            result(Intent::Apply, UnitState::Completed, None),
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::ManuallySkipped)),
        ];
        assert_eq!(result_code(&results), None);
    }

    #[test]
    fn test_precedence() {
        let results = vec![
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::UnitInvokeSet)),
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::DependencyUnsatisfied)),
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::MissingDependency)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::MissingDependency));

        let results = vec![
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::UnitInvokeSet)),
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::DuplicateIdentifier)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::DuplicateIdentifier));
    }

    #[test]
    fn test_processor_failure_is_set_apply_failed() {
        let results = vec![result(Intent::Apply, UnitState::Failed, Some(ErrorCode::Unexpected))];
        assert_eq!(result_code(&results), Some(ErrorCode::SetApplyFailed));
    }

    #[test]
    fn test_assert_error_counts_as_assertion_failure() {
        let results = vec![
            result(Intent::Assert, UnitState::Failed, Some(ErrorCode::Unexpected)),
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::AssertionFailed)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::AssertionFailed));
    }

    #[test]
    fn test_failure_outranks_dependents_skipped_because_of_it() {
        let results = vec![
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::UnitInvokeSet)),
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::DependencyUnsatisfied)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::SetApplyFailed));

        let results = vec![
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::UnitInvokeSet)),
            result(Intent::Apply, UnitState::Failed, Some(ErrorCode::DependencyUnsatisfied)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::DependencyUnsatisfied));
    }

    #[test]
    fn test_cascade_skip_is_never_success() {
        let results = vec![
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::ManuallySkipped)),
            result(Intent::Apply, UnitState::Skipped, Some(ErrorCode::DependencyUnsatisfied)),
        ];
        assert_eq!(result_code(&results), Some(ErrorCode::DependencyUnsatisfied));
    }
}
