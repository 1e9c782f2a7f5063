//! # Configuration
//!
//! An engine for declarative machine configuration.
//!
//! A configuration document describes a set of units, each naming a
//! resource type, the settings it should have and the units it depends on.
//! The engine validates the dependency graph, then drives a processor
//! backend through every unit, concurrently where dependencies allow.
//!
//! ## Core Concepts
//!
//! - **Unit**: one resource instance with desired settings and an intent
//!   (Assert, Inform or Apply)
//! - **Set**: an ordered collection of units applied together; a unit may
//!   itself be a group of units
//! - **Processor**: the backend that knows how to get, test and apply a
//!   resource type, see [`SetProcessorFactory`]
//! - **ConfigurationProcessor**: opens, applies and tests sets, reporting
//!   progress to observers
//!
//! ## Example
//!
//! ```ignore
//! use configuration::{ApplyFlags, ConfigurationProcessor};
//! use std::sync::Arc;
//!
//! let engine = ConfigurationProcessor::new(Arc::new(MyFactory)).with_jobs(4);
//! engine.add_observer(Arc::new(|event: &configuration::ChangeEvent| {
//!     println!("{event:?}");
//! }));
//!
//! let mut set = engine.open_set(&std::fs::read_to_string("machine.yaml")?)?;
//! let result = engine.apply_set(&mut set, ApplyFlags::default())?;
//! if let Some(code) = result.result_code {
//!     eprintln!("apply failed: {code}");
//! }
//! ```
//!
//! ## Backend Traits
//!
//! - [`SetProcessorFactory`]: creates a [`SetProcessor`] per environment
//! - [`SetProcessor`]: resolves units to [`UnitProcessor`]s
//! - [`UnitProcessor`]: gets, tests and applies one unit's settings
//! - [`GroupProcessor`]: optional capability to process a whole group at once
//!
//! The engine has no knowledge of concrete resource types; all of that
//! lives behind these traits.

pub mod aggregate;
pub mod cancel;
pub mod document;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub(crate) mod executor;
pub mod graph;
pub mod history;
pub mod processor;
pub(crate) mod scheduler;
pub mod set;
pub mod types;
pub mod unit;
pub mod value;

#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard};

// Re-export main types at crate root
pub use cancel::CancellationToken;
pub use document::{open_set, serialize_set};
pub use engine::{ApplyOperation, ConfigurationProcessor, DEFAULT_JOBS};
pub use environment::EnvironmentPool;
pub use error::{Error, ErrorCode, OpenError, ProcessorError, Result};
pub use events::{ChangeEvent, EventEmitter, ProgressObserver};
pub use graph::DependencyGraph;
pub use history::HistoryStore;
pub use processor::{
    ApplySettingsResult, GroupProcessor, SetProcessor, SetProcessorFactory, UnitProcessor,
};
pub use set::{ConfigurationSet, LATEST_SCHEMA_VERSION};
pub use types::{
    ApplyFlags, ApplySetResult, GetAllSettingsResult, GetSettingsResult, Intent, ResultInfo,
    ResultSource, SetState, TestOutcome, TestSetResult, UnitRef, UnitResult, UnitState,
    UnitTestResult,
};
pub use unit::{ConfigurationUnit, SecurityContext, UnitEnvironment, fold_identifier};
pub use value::{Value, ValueMap};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
