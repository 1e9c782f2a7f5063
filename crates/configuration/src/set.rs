//! Configuration sets

use crate::types::SetState;
use crate::unit::{ConfigurationUnit, UnitEnvironment};
use crate::value::ValueMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version written by [`crate::serialize_set`]
pub const LATEST_SCHEMA_VERSION: &str = "0.3";

/// An ordered collection of units applied together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSet {
    #[serde(default = "Uuid::new_v4")]
    pub instance_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub schema_version: String,
    /// Document order
    #[serde(default)]
    pub units: Vec<ConfigurationUnit>,
    #[serde(default)]
    pub metadata: ValueMap,
    /// Default environment for units that do not name one
    #[serde(default)]
    pub environment: UnitEnvironment,

    #[serde(default)]
    pub state: SetState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_apply: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_begun: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_ended: Option<DateTime<Utc>>,
}

impl Default for ConfigurationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationSet {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            name: String::new(),
            origin: String::new(),
            path: String::new(),
            schema_version: LATEST_SCHEMA_VERSION.to_string(),
            units: Vec::new(),
            metadata: ValueMap::new(),
            environment: UnitEnvironment::default(),
            state: SetState::Unknown,
            first_apply: None,
            apply_begun: None,
            apply_ended: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_unit(mut self, unit: ConfigurationUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_units(mut self, units: Vec<ConfigurationUnit>) -> Self {
        self.units = units;
        self
    }

    /// Find a unit anywhere in the set
    pub fn find_unit(&self, instance_id: Uuid) -> Option<&ConfigurationUnit> {
        self.units.iter().find_map(|u| u.find(instance_id))
    }

    pub fn find_unit_mut(&mut self, instance_id: Uuid) -> Option<&mut ConfigurationUnit> {
        self.units.iter_mut().find_map(|u| u.find_mut(instance_id))
    }

    /// Find a top-level unit by identifier, case-insensitively
    pub fn unit_by_identifier(&self, identifier: &str) -> Option<&ConfigurationUnit> {
        let folded = crate::unit::fold_identifier(identifier);
        self.units.iter().find(|u| u.folded_identifier() == folded)
    }

    /// Record the start of an apply run
    pub(crate) fn begin_apply(&mut self, now: DateTime<Utc>) {
        self.state = SetState::InProgress;
        self.apply_begun = Some(now);
        self.apply_ended = None;
        if self.first_apply.is_none() {
            self.first_apply = Some(now);
        }
        for unit in &mut self.units {
            unit.reset_runtime();
        }
    }

    pub(crate) fn end_apply(&mut self, now: DateTime<Utc>) {
        self.state = SetState::Completed;
        self.apply_ended = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_timestamps_are_ordered_across_runs() {
        let mut set = ConfigurationSet::new();
        let t0 = Utc::now();
        set.begin_apply(t0);
        set.end_apply(t0 + Duration::seconds(1));

        let t1 = t0 + Duration::seconds(5);
        set.begin_apply(t1);
        assert_eq!(set.first_apply, Some(t0));
        assert_eq!(set.apply_begun, Some(t1));
        assert_eq!(set.apply_ended, None);

        set.end_apply(t1 + Duration::seconds(1));
        assert_eq!(set.state, SetState::Completed);
        assert!(set.first_apply <= set.apply_begun && set.apply_begun <= set.apply_ended);
    }

    #[test]
    fn test_unit_by_identifier_is_case_insensitive() {
        let set = ConfigurationSet::new().with_unit(ConfigurationUnit::new("File").with_identifier("Profile"));
        assert!(set.unit_by_identifier("PROFILE").is_some());
        assert!(set.unit_by_identifier("other").is_none());
    }
}
