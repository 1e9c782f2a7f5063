//! Built-in resource processor
//!
//! Resolves unit types to native implementations:
//! - `File`: ensure a file's content (or absence)
//! - `Symlink`: ensure a symlink points at a source
//! - `Group`: carries child units; nothing to apply itself

pub mod file;
pub mod symlink;

use configuration::{
    ApplySettingsResult, ConfigurationSet, ConfigurationUnit, ErrorCode, ProcessorError,
    SecurityContext, SetProcessor, SetProcessorFactory, UnitEnvironment, UnitProcessor, ValueMap,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub use file::FileUnit;
pub use symlink::SymlinkUnit;

/// Processor identifier accepted in unit environments
pub const PROCESSOR_NAME: &str = "builtin";

pub struct BuiltinFactory;

impl SetProcessorFactory for BuiltinFactory {
    fn create_set_processor(
        &self,
        _set: &ConfigurationSet,
        environment: &UnitEnvironment,
    ) -> Result<Arc<dyn SetProcessor>, ProcessorError> {
        if environment.context == SecurityContext::Elevated {
            return Err(ProcessorError::Creation(
                "elevated environments are not supported by the built-in processor".to_string(),
            ));
        }
        if !environment.processor.is_empty() && !environment.processor.eq_ignore_ascii_case(PROCESSOR_NAME) {
            return Err(ProcessorError::Creation(format!(
                "unknown processor: {}",
                environment.processor
            )));
        }
        Ok(Arc::new(BuiltinSetProcessor))
    }
}

struct BuiltinSetProcessor;

impl SetProcessor for BuiltinSetProcessor {
    fn create_unit_processor(&self, unit: &ConfigurationUnit) -> Result<Box<dyn UnitProcessor>, ProcessorError> {
        match unit.unit_type.to_ascii_lowercase().as_str() {
            "file" => Ok(Box::new(FileUnit::from_settings(&unit.settings)?)),
            "symlink" => Ok(Box::new(SymlinkUnit::from_settings(&unit.settings)?)),
            "group" => Ok(Box::new(GroupUnit)),
            _ => Err(ProcessorError::ResourceNotFound(unit.unit_type.clone())),
        }
    }
}

/// A group's own state is its children's
struct GroupUnit;

impl UnitProcessor for GroupUnit {
    fn get_settings(&self) -> Result<ValueMap, ProcessorError> {
        Ok(ValueMap::new())
    }

    fn test_settings(&self) -> Result<bool, ProcessorError> {
        Ok(true)
    }

    fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError> {
        Ok(ApplySettingsResult::default())
    }
}

// ============================================================================
// Settings helpers
// ============================================================================

fn invalid_setting(message: String) -> ProcessorError {
    ProcessorError::Invocation {
        code: ErrorCode::InvalidFieldValue,
        message,
    }
}

/// A required path setting, with ~ and variables expanded
pub(crate) fn path_setting(settings: &ValueMap, key: &str) -> Result<PathBuf, ProcessorError> {
    match settings.get(key).and_then(|v| v.as_str()) {
        Some(path) if !path.is_empty() => Ok(crate::paths::expand(path)),
        Some(_) | None => Err(invalid_setting(format!("setting '{key}' must be a non-empty string"))),
    }
}

pub(crate) fn optional_str<'a>(settings: &'a ValueMap, key: &str) -> Result<Option<&'a str>, ProcessorError> {
    match settings.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid_setting(format!("setting '{key}' must be a string, not {}", value.kind()))),
    }
}

pub(crate) fn io_failure(code: ErrorCode, context: &str, e: &io::Error) -> ProcessorError {
    ProcessorError::Invocation {
        code,
        message: format!("{context}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configuration::Value;

    #[test]
    fn test_elevated_environment_is_rejected() {
        let set = ConfigurationSet::new();
        let err = BuiltinFactory
            .create_set_processor(&set, &UnitEnvironment::with_context(SecurityContext::Elevated))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::SetProcessorCreation);

        assert!(
            BuiltinFactory
                .create_set_processor(&set, &UnitEnvironment::with_context(SecurityContext::Restricted))
                .is_ok()
        );
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let set = ConfigurationSet::new();
        let processor = BuiltinFactory
            .create_set_processor(&set, &UnitEnvironment::default())
            .unwrap();
        let err = processor
            .create_unit_processor(&ConfigurationUnit::new("Registry"))
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::UnitNotFound);
    }

    #[test]
    fn test_bad_settings_are_reported() {
        let mut settings = ValueMap::new();
        assert!(path_setting(&settings, "path").is_err());
        settings.insert("path".into(), Value::Int(3));
        assert!(path_setting(&settings, "path").is_err());
        assert!(optional_str(&settings, "path").is_err());
        assert_eq!(optional_str(&settings, "missing").unwrap(), None);
    }
}
