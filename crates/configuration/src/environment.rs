//! Shared processor environments
//!
//! Units that run in the same [`UnitEnvironment`] share one set processor.
//! The set's default environment is created up front; every other
//! environment is created the first time a unit needs it, exactly once even
//! when several workers ask concurrently.

use crate::error::ProcessorError;
use crate::lock_unpoisoned;
use crate::processor::{SetProcessor, SetProcessorFactory};
use crate::set::ConfigurationSet;
use crate::unit::UnitEnvironment;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

type Slot = Arc<OnceLock<Result<Arc<dyn SetProcessor>, ProcessorError>>>;

pub struct EnvironmentPool<'a> {
    factory: &'a dyn SetProcessorFactory,
    set: &'a ConfigurationSet,
    default_processor: Arc<dyn SetProcessor>,
    slots: Mutex<HashMap<UnitEnvironment, Slot>>,
}

impl<'a> EnvironmentPool<'a> {
    /// Create the pool and the default environment's processor
    pub fn new(
        factory: &'a dyn SetProcessorFactory,
        set: &'a ConfigurationSet,
    ) -> Result<Self, ProcessorError> {
        log::debug!("creating default processor environment");
        let default_processor = factory.create_set_processor(set, &set.environment)?;
        Ok(Self {
            factory,
            set,
            default_processor,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_processor(&self) -> &Arc<dyn SetProcessor> {
        &self.default_processor
    }

    /// Set processor for `environment`, creating it on first use
    pub fn get(&self, environment: &UnitEnvironment) -> Result<Arc<dyn SetProcessor>, ProcessorError> {
        if *environment == self.set.environment {
            return Ok(Arc::clone(&self.default_processor));
        }

        // The map lock only guards slot lookup; creation happens outside it
        let slot = {
            let mut slots = lock_unpoisoned(&self.slots);
            Arc::clone(slots.entry(environment.clone()).or_default())
        };

        slot.get_or_init(|| {
            log::debug!(
                "creating processor environment (context: {}, processor: {:?})",
                environment.context.as_str(),
                environment.processor
            );
            let created = self.factory.create_set_processor(self.set, environment);
            if let Err(e) = &created {
                log::warn!("processor environment creation failed: {e}");
            }
            created
        })
        .clone()
    }
}
