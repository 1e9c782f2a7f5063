//! Core types for configuration units, sets and their results

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How the engine treats a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Intent {
    /// Only test; a negative result aborts the set
    Assert,
    /// Only read the current settings
    Inform,
    /// Test, then set when not in the desired state
    #[default]
    Apply,
}

impl Intent {
    /// Scheduling phases, in execution order
    pub const PHASES: [Self; 3] = [Self::Assert, Self::Inform, Self::Apply];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assert => "assert",
            Self::Inform => "inform",
            Self::Apply => "apply",
        }
    }

    /// Parse a case-insensitive intent name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "assert" => Some(Self::Assert),
            "inform" => Some(Self::Inform),
            "apply" => Some(Self::Apply),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit state within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitState {
    #[default]
    Unknown,
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Set-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetState {
    #[default]
    Unknown,
    Pending,
    InProgress,
    Completed,
}

/// Where a unit result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultSource {
    #[default]
    None,
    /// Engine or processor plumbing failed
    Internal,
    /// The set's structure is invalid
    ConfigurationSet,
    /// The processor reported a failure for the unit
    UnitProcessing,
    /// The unit was not run because a precondition did not hold
    Precondition,
}

/// Outcome details attached to a unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultInfo {
    /// `None` on success
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(default)]
    pub source: ResultSource,
}

impl ResultInfo {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(code: ErrorCode, source: ResultSource) -> Self {
        Self {
            code: Some(code),
            description: code.message().to_string(),
            details: String::new(),
            source,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code.is_none()
    }
}

/// Result of testing one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    /// In the desired state
    Positive,
    /// Not in the desired state
    Negative,
    /// The test could not be completed
    Failed,
    /// The unit is not testable
    NotRun,
}

impl TestOutcome {
    /// Combine per-unit outcomes: Failed > Negative > Positive, NotRun ignored
    pub fn aggregate<I: IntoIterator<Item = Self>>(outcomes: I) -> Self {
        outcomes
            .into_iter()
            .fold(Self::NotRun, |acc, outcome| match (acc, outcome) {
                (Self::Failed, _) | (_, Self::Failed) => Self::Failed,
                (Self::Negative, _) | (_, Self::Negative) => Self::Negative,
                (Self::Positive, _) | (_, Self::Positive) => Self::Positive,
                _ => Self::NotRun,
            })
    }
}

/// A lightweight reference to a unit, carried in results and events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub instance_id: Uuid,
    pub identifier: String,
    pub unit_type: String,
    pub intent: Intent,
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identifier.is_empty() {
            write!(f, "{}", self.unit_type)
        } else {
            write!(f, "{} [{}]", self.identifier, self.unit_type)
        }
    }
}

/// Final result for one unit of an apply run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: UnitRef,
    pub state: UnitState,
    pub previously_in_desired_state: bool,
    pub reboot_required: bool,
    pub result: ResultInfo,
}

/// Final result for one unit of a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestResult {
    pub unit: UnitRef,
    pub outcome: TestOutcome,
    pub result: ResultInfo,
}

/// Result of applying a set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySetResult {
    /// Depth-first, in document order
    pub unit_results: Vec<UnitResult>,
    /// `None` when every unit succeeded
    pub result_code: Option<ErrorCode>,
}

impl ApplySetResult {
    pub fn is_success(&self) -> bool {
        self.result_code.is_none()
    }

    /// Result for a unit by instance id
    pub fn unit(&self, instance_id: Uuid) -> Option<&UnitResult> {
        self.unit_results.iter().find(|r| r.unit.instance_id == instance_id)
    }

    pub fn count(&self, state: UnitState) -> usize {
        self.unit_results.iter().filter(|r| r.state == state).count()
    }
}

/// Result of testing a set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSetResult {
    pub unit_results: Vec<UnitTestResult>,
    pub outcome: TestOutcome,
}

impl TestSetResult {
    pub fn unit(&self, instance_id: Uuid) -> Option<&UnitTestResult> {
        self.unit_results.iter().find(|r| r.unit.instance_id == instance_id)
    }
}

/// Result of reading one unit's settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSettingsResult {
    pub unit: UnitRef,
    pub settings: Option<crate::ValueMap>,
    pub result: ResultInfo,
}

/// Result of enumerating every instance of a unit's resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAllSettingsResult {
    pub unit: UnitRef,
    pub settings: Vec<crate::ValueMap>,
    pub result: ResultInfo,
}

/// Options for applying a set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyFlags {
    /// Validate the unit graph only; no processors are created
    pub consistency_check_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_precedence() {
        use TestOutcome::*;

        assert_eq!(TestOutcome::aggregate([Positive, Negative, Positive]), Negative);
        assert_eq!(TestOutcome::aggregate([Positive, Failed, Negative]), Failed);
        assert_eq!(TestOutcome::aggregate([NotRun, Positive, NotRun]), Positive);
        assert_eq!(TestOutcome::aggregate([NotRun]), NotRun);
        assert_eq!(TestOutcome::aggregate(Vec::new()), NotRun);
    }

    #[test]
    fn test_intent_parse() {
        assert_eq!(Intent::parse("Assert"), Some(Intent::Assert));
        assert_eq!(Intent::parse("INFORM"), Some(Intent::Inform));
        assert_eq!(Intent::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(UnitState::Skipped.is_terminal());
        assert!(!UnitState::InProgress.is_terminal());
        assert!(!UnitState::Pending.is_terminal());
    }

    #[test]
    fn test_result_info_failure_describes_code() {
        let info = ResultInfo::failure(ErrorCode::ManuallySkipped, ResultSource::Precondition)
            .with_details("apply4");
        assert!(!info.is_success());
        assert_eq!(info.description, ErrorCode::ManuallySkipped.message());
        assert_eq!(info.details, "apply4");
    }
}
