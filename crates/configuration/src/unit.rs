//! Configuration units and the environments they run in

use crate::types::{Intent, ResultInfo, UnitRef, UnitState};
use crate::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Privilege level a processor environment runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityContext {
    #[default]
    Current,
    Restricted,
    Elevated,
}

impl SecurityContext {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "current" => Some(Self::Current),
            "restricted" => Some(Self::Restricted),
            "elevated" => Some(Self::Elevated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Restricted => "restricted",
            Self::Elevated => "elevated",
        }
    }
}

/// Identifies one shared processor environment
///
/// Units with equal environments share a single set processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitEnvironment {
    #[serde(default)]
    pub context: SecurityContext,
    /// Processor identifier; empty selects the factory default
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub processor: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl UnitEnvironment {
    pub fn with_context(context: SecurityContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }
}

/// A single typed resource with settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUnit {
    #[serde(default = "Uuid::new_v4")]
    pub instance_id: Uuid,
    #[serde(default)]
    pub identifier: String,
    pub unit_type: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub should_apply: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<ConfigurationUnit>,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default)]
    pub settings: ValueMap,
    /// `None` inherits the set's environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<UnitEnvironment>,

    // Runtime fields, written back after a run
    #[serde(default)]
    pub state: UnitState,
    #[serde(default)]
    pub result: ResultInfo,
    #[serde(default)]
    pub previously_in_desired_state: bool,
    #[serde(default)]
    pub reboot_required: bool,
}

fn default_true() -> bool {
    true
}

impl ConfigurationUnit {
    pub fn new(unit_type: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            identifier: String::new(),
            unit_type: unit_type.into(),
            intent: Intent::default(),
            dependencies: Vec::new(),
            is_active: true,
            should_apply: true,
            is_group: false,
            units: Vec::new(),
            metadata: ValueMap::new(),
            settings: ValueMap::new(),
            environment: None,
            state: UnitState::Unknown,
            result: ResultInfo::default(),
            previously_in_desired_state: false,
            reboot_required: false,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    /// Add a dependency; duplicates (case-insensitive) are ignored
    pub fn depends_on(mut self, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let folded = fold_identifier(&identifier);
        if !self.dependencies.iter().any(|d| fold_identifier(d) == folded) {
            self.dependencies.push(identifier);
        }
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_environment(mut self, environment: UnitEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Make this unit a group containing `units`
    pub fn with_units(mut self, units: Vec<ConfigurationUnit>) -> Self {
        self.is_group = true;
        self.units = units;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Mark the unit to be skipped by request
    pub fn skipped(mut self) -> Self {
        self.should_apply = false;
        self
    }

    pub fn folded_identifier(&self) -> String {
        fold_identifier(&self.identifier)
    }

    pub fn to_ref(&self) -> UnitRef {
        UnitRef {
            instance_id: self.instance_id,
            identifier: self.identifier.clone(),
            unit_type: self.unit_type.clone(),
            intent: self.intent,
        }
    }

    /// Description from metadata, if any
    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(Value::as_str)
    }

    /// Environment this unit runs in, given the set default
    pub fn effective_environment<'a>(&'a self, default: &'a UnitEnvironment) -> &'a UnitEnvironment {
        self.environment.as_ref().unwrap_or(default)
    }

    /// Clear runtime fields, recursively
    pub fn reset_runtime(&mut self) {
        self.state = UnitState::Unknown;
        self.result = ResultInfo::default();
        self.previously_in_desired_state = false;
        self.reboot_required = false;
        for child in &mut self.units {
            child.reset_runtime();
        }
    }

    /// Find a unit by instance id in this subtree
    pub fn find(&self, instance_id: Uuid) -> Option<&ConfigurationUnit> {
        if self.instance_id == instance_id {
            return Some(self);
        }
        self.units.iter().find_map(|u| u.find(instance_id))
    }

    pub fn find_mut(&mut self, instance_id: Uuid) -> Option<&mut ConfigurationUnit> {
        if self.instance_id == instance_id {
            return Some(self);
        }
        self.units.iter_mut().find_map(|u| u.find_mut(instance_id))
    }
}

/// Identifiers compare case-insensitively
pub fn fold_identifier(identifier: &str) -> String {
    identifier.to_lowercase()
}
