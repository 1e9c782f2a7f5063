//! Processor traits the engine calls into
//!
//! A processor backend knows how to read, test and apply one kind of unit.
//! The engine never talks to a resource directly: it asks a
//! [`SetProcessorFactory`] for a [`SetProcessor`] per environment, and the set
//! processor for a [`UnitProcessor`] per unit.
//!
//! # Example
//!
//! ```ignore
//! use configuration::{ApplySettingsResult, ProcessorError, UnitProcessor, ValueMap};
//!
//! struct Echo(ValueMap);
//!
//! impl UnitProcessor for Echo {
//!     fn get_settings(&self) -> Result<ValueMap, ProcessorError> {
//!         Ok(self.0.clone())
//!     }
//!     fn test_settings(&self) -> Result<bool, ProcessorError> {
//!         Ok(true)
//!     }
//!     fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError> {
//!         Ok(ApplySettingsResult::default())
//!     }
//! }
//! ```

use crate::error::ProcessorError;
use crate::set::ConfigurationSet;
use crate::types::{UnitResult, UnitTestResult};
use crate::unit::{ConfigurationUnit, UnitEnvironment};
use crate::value::ValueMap;
use std::sync::Arc;

/// Creates one set processor per environment
pub trait SetProcessorFactory: Send + Sync {
    /// Create the processor for `environment`
    ///
    /// Failing for the set's default environment aborts the whole
    /// operation. Failing for any other environment fails only the units
    /// that run in it.
    fn create_set_processor(
        &self,
        set: &ConfigurationSet,
        environment: &UnitEnvironment,
    ) -> Result<Arc<dyn SetProcessor>, ProcessorError>;
}

/// Creates unit processors within one environment
pub trait SetProcessor: Send + Sync {
    /// Resolve the resource behind `unit`
    fn create_unit_processor(
        &self,
        unit: &ConfigurationUnit,
    ) -> Result<Box<dyn UnitProcessor>, ProcessorError>;

    /// Group capability: when present the whole set is delegated to it
    fn as_group(&self) -> Option<&dyn GroupProcessor> {
        None
    }
}

/// Settings operations for a single unit
pub trait UnitProcessor: Send {
    /// Read the current settings
    fn get_settings(&self) -> Result<ValueMap, ProcessorError>;

    /// Returns `true` when the unit is already in the desired state
    fn test_settings(&self) -> Result<bool, ProcessorError>;

    /// Bring the unit to the desired state
    fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError>;

    /// Enumerate the settings of every instance of this resource
    fn get_all_settings(&self) -> Result<Vec<ValueMap>, ProcessorError> {
        Err(ProcessorError::NotSupported("get all settings".into()))
    }

    /// Group capability for units flagged `is_group`
    fn as_group(&self) -> Option<&dyn GroupProcessor> {
        None
    }
}

/// Outcome of a successful apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySettingsResult {
    pub reboot_required: bool,
}

/// Processes a group of units in one call
///
/// Implementations report one result per unit they were handed plus, for a
/// group unit, one for the group itself. Units missing from the returned
/// list are recorded as failed by the engine.
pub trait GroupProcessor: Send + Sync {
    fn apply_group(&self) -> Result<Vec<UnitResult>, ProcessorError>;

    fn test_group(&self) -> Result<Vec<UnitTestResult>, ProcessorError>;
}
