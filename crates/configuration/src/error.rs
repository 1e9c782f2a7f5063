//! Error types for the configuration engine

use crate::types::{ResultInfo, ResultSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result codes surfaced on units and sets
///
/// The numeric values are stable and shared with other tools that report
/// configuration results, see [`ErrorCode::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidConfigurationFile,
    InvalidYaml,
    InvalidFieldType,
    UnknownConfigurationFileVersion,
    SetApplyFailed,
    DuplicateIdentifier,
    MissingDependency,
    DependencyUnsatisfied,
    AssertionFailed,
    ManuallySkipped,
    InvalidFieldValue,
    MissingField,
    TestFailed,
    TestNotRun,
    GetFailed,
    UnitNotFound,
    UnitInvokeGet,
    UnitInvokeTest,
    UnitInvokeSet,
    UnitModuleConflict,
    NotSupportedByProcessor,
    SetProcessorCreation,
    OperationCancelled,
    Unexpected,
}

impl ErrorCode {
    /// Numeric code, formatted like an HRESULT
    pub fn code(self) -> u32 {
        match self {
            Self::InvalidConfigurationFile => 0x8A15_C001,
            Self::InvalidYaml => 0x8A15_C002,
            Self::InvalidFieldType => 0x8A15_C003,
            Self::UnknownConfigurationFileVersion => 0x8A15_C004,
            Self::SetApplyFailed => 0x8A15_C005,
            Self::DuplicateIdentifier => 0x8A15_C006,
            Self::MissingDependency => 0x8A15_C007,
            Self::DependencyUnsatisfied => 0x8A15_C008,
            Self::AssertionFailed => 0x8A15_C009,
            Self::ManuallySkipped => 0x8A15_C00A,
            Self::InvalidFieldValue => 0x8A15_C00D,
            Self::MissingField => 0x8A15_C00E,
            Self::TestFailed => 0x8A15_C00F,
            Self::TestNotRun => 0x8A15_C010,
            Self::GetFailed => 0x8A15_C011,
            Self::UnitNotFound => 0x8A15_C101,
            Self::UnitInvokeGet => 0x8A15_C104,
            Self::UnitInvokeTest => 0x8A15_C105,
            Self::UnitInvokeSet => 0x8A15_C106,
            Self::UnitModuleConflict => 0x8A15_C107,
            Self::NotSupportedByProcessor => 0x8A15_C112,
            Self::SetProcessorCreation => 0x8A15_C113,
            Self::OperationCancelled => 0x8007_04C7,
            Self::Unexpected => 0x8000_FFFF,
        }
    }

    /// Human-readable description
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidConfigurationFile => "the configuration file is invalid",
            Self::InvalidYaml => "the configuration file is not valid YAML",
            Self::InvalidFieldType => "a configuration field has an invalid type",
            Self::UnknownConfigurationFileVersion => "the configuration file version is unknown",
            Self::SetApplyFailed => "one or more units failed while applying the configuration",
            Self::DuplicateIdentifier => "the configuration contains a duplicate identifier",
            Self::MissingDependency => "a unit depends on an identifier that is not in the set",
            Self::DependencyUnsatisfied => "a unit could not run because a dependency did not succeed",
            Self::AssertionFailed => "an assertion unit was not in the desired state",
            Self::ManuallySkipped => "the unit was skipped by request",
            Self::InvalidFieldValue => "a configuration field has an invalid value",
            Self::MissingField => "a required configuration field is missing",
            Self::TestFailed => "one or more units failed while testing the configuration",
            Self::TestNotRun => "the test was not run",
            Self::GetFailed => "getting the unit settings failed",
            Self::UnitNotFound => "the resource for the unit could not be found",
            Self::UnitInvokeGet => "the processor failed to get the unit settings",
            Self::UnitInvokeTest => "the processor failed to test the unit settings",
            Self::UnitInvokeSet => "the processor failed to apply the unit settings",
            Self::UnitModuleConflict => "multiple modules provide the unit's resource",
            Self::NotSupportedByProcessor => "the operation is not supported by the processor",
            Self::SetProcessorCreation => "the set processor could not be created",
            Self::OperationCancelled => "the operation was cancelled",
            Self::Unexpected => "an unexpected error occurred",
        }
    }

    /// Whether the code is a document parsing error
    pub fn is_document_error(self) -> bool {
        matches!(
            self,
            Self::InvalidConfigurationFile
                | Self::InvalidYaml
                | Self::InvalidFieldType
                | Self::UnknownConfigurationFileVersion
                | Self::InvalidFieldValue
                | Self::MissingField
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} ({})", self.code(), self.message())
    }
}

/// Errors reported by a resource processor backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The operation does not apply to this unit (e.g. Apply on an Inform unit)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// No resource implementation matches the unit type
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// More than one module provides the unit type
    #[error("resource {unit_type} is provided by multiple modules: {}", .modules.join(", "))]
    ModuleConflict {
        unit_type: String,
        modules: Vec<String>,
    },

    /// A processor or processor environment could not be created
    #[error("processor creation failed: {0}")]
    Creation(String),

    /// The backend call itself failed
    #[error("{message}")]
    Invocation { code: ErrorCode, message: String },

    /// The backend reported a fully described failure
    #[error("{}", .0.description)]
    Failed(ResultInfo),
}

impl ProcessorError {
    /// Code recorded on the unit for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotSupported(_) => ErrorCode::NotSupportedByProcessor,
            Self::ResourceNotFound(_) => ErrorCode::UnitNotFound,
            Self::ModuleConflict { .. } => ErrorCode::UnitModuleConflict,
            Self::Creation(_) => ErrorCode::SetProcessorCreation,
            Self::Invocation { code, .. } => *code,
            Self::Failed(info) => info.code.unwrap_or(ErrorCode::Unexpected),
        }
    }

    /// Convert into unit result information with the given default source.
    ///
    /// `Failed` keeps the backend's own source.
    pub fn into_result_info(self, source: ResultSource) -> ResultInfo {
        match self {
            Self::Failed(info) => info,
            other => ResultInfo::failure(other.code(), source).with_description(other.to_string()),
        }
    }
}

/// Location and cause of a document that could not be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{}{}", .code.message(), .field.as_ref().map(|f| format!(" [field: {f}]")).unwrap_or_default(), location_suffix(*.line, *.column))]
pub struct OpenError {
    pub code: ErrorCode,
    /// Field that caused the error, if known
    pub field: Option<String>,
    /// Offending value, if known
    pub value: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

fn location_suffix(line: Option<usize>, column: Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

impl OpenError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            field: None,
            value: None,
            line: None,
            column: None,
        }
    }

    pub fn field(code: ErrorCode, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(code)
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Errors that abort a whole engine operation
#[derive(Error, Debug)]
pub enum Error {
    /// The set processor for the set's default environment could not be created
    #[error("failed to create the set processor: {0}")]
    ProcessorCreation(#[source] ProcessorError),

    /// A caller supplied an argument the engine cannot work with
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration document could not be opened
    #[error("failed to open configuration: {0}")]
    Document(#[from] OpenError),

    /// History file I/O failed
    #[error("history error at {}: {source}", .path.display())]
    History {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No history entry exists for the given set
    #[error("no history entry for set {0}")]
    HistoryNotFound(String),

    /// The worker pool could not be started
    #[error("failed to start workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// The background operation thread panicked
    #[error("the operation terminated unexpectedly")]
    OperationPanicked,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
