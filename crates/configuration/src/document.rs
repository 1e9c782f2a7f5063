//! YAML configuration documents
//!
//! Two document shapes are understood:
//!
//! - schema 0.1 / 0.2: a `properties` map carrying `configurationVersion`
//!   and the `assertions`, `parameters` and `resources` unit lists
//! - schema 0.3: a `$schema` URI, top-level `metadata` and a `resources`
//!   list whose entries may nest further `resources` as a group
//!
//! Sets are always written back in the 0.3 shape.

use crate::error::{Error, ErrorCode, OpenError};
use crate::set::{ConfigurationSet, LATEST_SCHEMA_VERSION};
use crate::types::Intent;
use crate::unit::{ConfigurationUnit, SecurityContext, UnitEnvironment};
use crate::value::{Value, ValueMap};
use serde_yaml::{Mapping, Value as Yaml};

const SCHEMA_URI_PREFIX: &str = "https://aka.ms/configuration-dsc-schema/";
const DSC_DOCUMENT_SCHEMA: &str =
    "https://raw.githubusercontent.com/PowerShell/DSC/main/schemas/2023/08/config/document.json";

const SCHEMA: &str = "$schema";
const PROPERTIES: &str = "properties";
const CONFIGURATION_VERSION: &str = "configurationVersion";
const RESOURCES: &str = "resources";
const METADATA: &str = "metadata";
const SECURITY_CONTEXT: &str = "securityContext";
const INTENT: &str = "intent";
const IS_ACTIVE: &str = "isActive";
const WINGET: &str = "winget";
const PROCESSOR: &str = "processor";

/// Parse a configuration document
pub fn open_set(input: &str) -> Result<ConfigurationSet, OpenError> {
    let document: Yaml = serde_yaml::from_str(input).map_err(|e| {
        let mut err = OpenError::new(ErrorCode::InvalidYaml).with_value(e.to_string());
        if let Some(location) = e.location() {
            err.line = Some(location.line());
            err.column = Some(location.column());
        }
        err
    })?;

    let root = match document {
        Yaml::Mapping(root) => root,
        Yaml::Null => return Err(OpenError::field(ErrorCode::MissingField, SCHEMA)),
        _ => return Err(OpenError::new(ErrorCode::InvalidConfigurationFile)),
    };

    if let Some(schema) = root.get(SCHEMA) {
        let uri = schema
            .as_str()
            .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, SCHEMA))?;
        let version = schema_version(uri).ok_or_else(|| {
            log::warn!("unknown configuration schema: {uri}");
            OpenError::field(ErrorCode::UnknownConfigurationFileVersion, SCHEMA).with_value(uri)
        })?;
        log::debug!("configuration schema {uri} mapped to version {version}");
        return parse_grouped(&root, version);
    }

    let properties = match root.get(PROPERTIES) {
        None => return Err(OpenError::field(ErrorCode::MissingField, SCHEMA)),
        Some(Yaml::Mapping(properties)) => properties,
        Some(_) => return Err(OpenError::field(ErrorCode::InvalidFieldType, PROPERTIES)),
    };
    let version = match properties.get(CONFIGURATION_VERSION) {
        None => return Err(OpenError::field(ErrorCode::MissingField, CONFIGURATION_VERSION)),
        Some(Yaml::String(s)) => s.clone(),
        Some(Yaml::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(OpenError::field(ErrorCode::InvalidFieldType, CONFIGURATION_VERSION));
        }
    };
    match major_minor(&version).as_deref() {
        Some(v @ ("0.1" | "0.2")) => parse_flat(properties, v),
        _ => Err(
            OpenError::field(ErrorCode::UnknownConfigurationFileVersion, CONFIGURATION_VERSION)
                .with_value(version),
        ),
    }
}

/// Map a `$schema` URI to a schema version
fn schema_version(uri: &str) -> Option<&'static str> {
    if uri == DSC_DOCUMENT_SCHEMA {
        return Some("0.3");
    }
    match uri.strip_prefix(SCHEMA_URI_PREFIX).and_then(major_minor).as_deref() {
        Some("0.3") => Some("0.3"),
        _ => None,
    }
}

fn major_minor(version: &str) -> Option<String> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some(format!("{major}.{minor}"))
}

// ============================================================================
// Field helpers
// ============================================================================

fn mapping_field<'m>(map: &'m Mapping, key: &str, path: &str) -> Result<Option<&'m Mapping>, OpenError> {
    match map.get(key) {
        None | Some(Yaml::Null) => Ok(None),
        Some(Yaml::Mapping(m)) => Ok(Some(m)),
        Some(_) => Err(OpenError::field(ErrorCode::InvalidFieldType, path)),
    }
}

fn sequence_field<'m>(map: &'m Mapping, key: &str, path: &str) -> Result<Option<&'m [Yaml]>, OpenError> {
    match map.get(key) {
        None | Some(Yaml::Null) => Ok(None),
        Some(Yaml::Sequence(s)) => Ok(Some(s)),
        Some(_) => Err(OpenError::field(ErrorCode::InvalidFieldType, path)),
    }
}

fn string_field(map: &Mapping, key: &str, path: &str, required: bool) -> Result<String, OpenError> {
    match map.get(key) {
        Some(Yaml::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Yaml::Number(n)) => Ok(n.to_string()),
        Some(Yaml::Bool(b)) => Ok(b.to_string()),
        None | Some(Yaml::Null) if !required => Ok(String::new()),
        Some(Yaml::String(_)) if !required => Ok(String::new()),
        None | Some(Yaml::Null | Yaml::String(_)) => Err(OpenError::field(ErrorCode::MissingField, path)),
        Some(_) => Err(OpenError::field(ErrorCode::InvalidFieldType, path)),
    }
}

fn string_list(map: &Mapping, key: &str, path: &str) -> Result<Vec<String>, OpenError> {
    let Some(items) = sequence_field(map, key, path)? else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Yaml::String(s) => Ok(s.clone()),
            _ => Err(OpenError::field(ErrorCode::InvalidFieldType, format!("{path}[{i}]"))),
        })
        .collect()
}

fn value_map(mapping: &Mapping, path: &str) -> Result<ValueMap, OpenError> {
    let value = Value::try_from(Yaml::Mapping(mapping.clone()))
        .map_err(|e| OpenError::field(ErrorCode::InvalidFieldValue, path).with_value(e.0))?;
    match value.normalize() {
        Value::Map(map) => Ok(map),
        other => Err(OpenError::field(ErrorCode::InvalidFieldType, path).with_value(other.kind())),
    }
}

/// Remove environment keys from `metadata`, returning the environment they describe
fn take_environment(metadata: &mut ValueMap, path: &str) -> Result<Option<UnitEnvironment>, OpenError> {
    let mut environment = UnitEnvironment::default();
    let mut found = false;

    if let Some(context) = metadata.remove(SECURITY_CONTEXT) {
        let field = format!("{path}.{SECURITY_CONTEXT}");
        let name = context
            .as_str()
            .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, field.clone()))?;
        environment.context = SecurityContext::parse(name)
            .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldValue, field).with_value(name))?;
        found = true;
    }

    let mut winget_empty = false;
    if let Some(Value::Map(winget)) = metadata.get_mut(WINGET) {
        if let Some(processor) = winget.remove(PROCESSOR) {
            let field = format!("{path}.{WINGET}.{PROCESSOR}");
            let processor = processor
                .as_map()
                .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, field.clone()))?;
            if let Some(identifier) = processor.get("identifier") {
                environment.processor = identifier
                    .as_str()
                    .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, format!("{field}.identifier")))?
                    .to_string();
            }
            if let Some(properties) = processor.get("properties") {
                let field = format!("{field}.properties");
                let properties = properties
                    .as_map()
                    .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, field.clone()))?;
                for (k, v) in properties {
                    let v = v
                        .as_str()
                        .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, format!("{field}.{k}")))?;
                    environment.properties.insert(k.clone(), v.to_string());
                }
            }
            found = true;
        }
        winget_empty = winget.is_empty();
    }
    if winget_empty {
        metadata.remove(WINGET);
    }

    Ok(found.then_some(environment))
}

// ============================================================================
// Schema 0.1 / 0.2
// ============================================================================

fn parse_flat(properties: &Mapping, version: &str) -> Result<ConfigurationSet, OpenError> {
    let mut set = ConfigurationSet::new();
    set.schema_version = version.to_string();

    for (key, intent) in [
        ("assertions", Intent::Assert),
        ("parameters", Intent::Inform),
        (RESOURCES, Intent::Apply),
    ] {
        let path = format!("{PROPERTIES}.{key}");
        let Some(items) = sequence_field(properties, key, &path)? else {
            continue;
        };
        for (i, item) in items.iter().enumerate() {
            set.units
                .push(parse_flat_unit(item, intent, &format!("{path}[{i}]"), version)?);
        }
    }
    Ok(set)
}

fn parse_flat_unit(node: &Yaml, intent: Intent, path: &str, version: &str) -> Result<ConfigurationUnit, OpenError> {
    let map = node
        .as_mapping()
        .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, path))?;

    let mut unit = ConfigurationUnit::new(string_field(map, "resource", &format!("{path}.resource"), true)?)
        .with_intent(intent);
    unit.identifier = string_field(map, "id", &format!("{path}.id"), false)?;
    unit.dependencies = string_list(map, "dependsOn", &format!("{path}.dependsOn"))?;

    let directives_path = format!("{path}.directives");
    if let Some(directives) = mapping_field(map, "directives", &directives_path)? {
        unit.metadata = value_map(directives, &directives_path)?;
        if version != "0.1" {
            unit.environment = take_environment(&mut unit.metadata, &directives_path)?;
        }
    }

    let settings_path = format!("{path}.settings");
    if let Some(settings) = mapping_field(map, "settings", &settings_path)? {
        unit.settings = value_map(settings, &settings_path)?;
    }
    Ok(unit)
}

// ============================================================================
// Schema 0.3
// ============================================================================

fn parse_grouped(root: &Mapping, version: &str) -> Result<ConfigurationSet, OpenError> {
    let mut set = ConfigurationSet::new();
    set.schema_version = version.to_string();

    if let Some(metadata) = mapping_field(root, METADATA, METADATA)? {
        let mut metadata = value_map(metadata, METADATA)?;
        if let Some(environment) = take_environment(&mut metadata, METADATA)? {
            set.environment = environment;
        }
        if let Some(name) = metadata.get("name").and_then(Value::as_str) {
            set.name = name.to_string();
        }
        set.metadata = metadata;
    }

    set.units = parse_grouped_units(root, RESOURCES)?;
    Ok(set)
}

fn parse_grouped_units(map: &Mapping, path: &str) -> Result<Vec<ConfigurationUnit>, OpenError> {
    let Some(items) = sequence_field(map, RESOURCES, path)? else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_grouped_unit(item, &format!("{path}[{i}]")))
        .collect()
}

fn parse_grouped_unit(node: &Yaml, path: &str) -> Result<ConfigurationUnit, OpenError> {
    let map = node
        .as_mapping()
        .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, path))?;

    let mut unit = ConfigurationUnit::new(string_field(map, "type", &format!("{path}.type"), true)?);
    unit.identifier = string_field(map, "name", &format!("{path}.name"), true)?;
    unit.dependencies = string_list(map, "dependsOn", &format!("{path}.dependsOn"))?;

    let metadata_path = format!("{path}.{METADATA}");
    if let Some(metadata) = mapping_field(map, METADATA, &metadata_path)? {
        let mut metadata = value_map(metadata, &metadata_path)?;
        if let Some(intent) = metadata.remove(INTENT) {
            let field = format!("{metadata_path}.{INTENT}");
            let name = intent
                .as_str()
                .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldType, field.clone()))?;
            unit.intent = Intent::parse(name)
                .ok_or_else(|| OpenError::field(ErrorCode::InvalidFieldValue, field).with_value(name))?;
        }
        if let Some(active) = metadata.remove(IS_ACTIVE) {
            unit.is_active = active.as_bool().ok_or_else(|| {
                OpenError::field(ErrorCode::InvalidFieldType, format!("{metadata_path}.{IS_ACTIVE}"))
            })?;
        }
        unit.environment = take_environment(&mut metadata, &metadata_path)?;
        unit.metadata = metadata;
    }

    let properties_path = format!("{path}.{PROPERTIES}");
    if let Some(properties) = mapping_field(map, PROPERTIES, &properties_path)? {
        let is_group = matches!(properties.get(RESOURCES), Some(Yaml::Sequence(_)));
        if is_group {
            unit.is_group = true;
            unit.units = parse_grouped_units(properties, &format!("{properties_path}.{RESOURCES}"))?;
        }
        let mut settings = value_map(properties, &properties_path)?;
        if is_group {
            settings.remove(RESOURCES);
        }
        unit.settings = settings;
    }
    Ok(unit)
}

// ============================================================================
// Serialization
// ============================================================================

/// Write `set` as a schema 0.3 document
pub fn serialize_set(set: &ConfigurationSet) -> Result<String, Error> {
    let mut root = Mapping::new();
    root.insert(
        SCHEMA.into(),
        format!("{SCHEMA_URI_PREFIX}{LATEST_SCHEMA_VERSION}").into(),
    );

    let mut metadata = set.metadata.clone();
    if !set.name.is_empty() {
        metadata.insert("name".to_string(), Value::from(set.name.as_str()));
    }
    put_environment(&mut metadata, &set.environment);
    if !metadata.is_empty() {
        root.insert(METADATA.into(), Yaml::from(&Value::Map(metadata)));
    }

    root.insert(
        RESOURCES.into(),
        Yaml::Sequence(set.units.iter().map(serialize_unit).collect()),
    );

    Ok(serde_yaml::to_string(&Yaml::Mapping(root))?)
}

fn serialize_unit(unit: &ConfigurationUnit) -> Yaml {
    let mut map = Mapping::new();
    if !unit.identifier.is_empty() {
        map.insert("name".into(), unit.identifier.as_str().into());
    }
    map.insert("type".into(), unit.unit_type.as_str().into());
    if !unit.dependencies.is_empty() {
        map.insert(
            "dependsOn".into(),
            Yaml::Sequence(unit.dependencies.iter().map(|d| d.as_str().into()).collect()),
        );
    }

    let mut metadata = unit.metadata.clone();
    if unit.intent != Intent::Apply {
        metadata.insert(INTENT.to_string(), Value::from(unit.intent.as_str()));
    }
    if !unit.is_active {
        metadata.insert(IS_ACTIVE.to_string(), Value::Bool(false));
    }
    if let Some(environment) = &unit.environment {
        put_environment(&mut metadata, environment);
    }
    if !metadata.is_empty() {
        map.insert(METADATA.into(), Yaml::from(&Value::Map(metadata)));
    }

    let mut properties = match Yaml::from(&Value::Map(unit.settings.clone())) {
        Yaml::Mapping(m) => m,
        _ => Mapping::new(),
    };
    if unit.is_group {
        properties.insert(
            RESOURCES.into(),
            Yaml::Sequence(unit.units.iter().map(serialize_unit).collect()),
        );
    }
    if !properties.is_empty() {
        map.insert(PROPERTIES.into(), Yaml::Mapping(properties));
    }
    Yaml::Mapping(map)
}

fn put_environment(metadata: &mut ValueMap, environment: &UnitEnvironment) {
    if environment.context != SecurityContext::Current {
        metadata.insert(
            SECURITY_CONTEXT.to_string(),
            Value::from(environment.context.as_str()),
        );
    }
    if environment.processor.is_empty() && environment.properties.is_empty() {
        return;
    }

    let mut processor = ValueMap::new();
    if !environment.processor.is_empty() {
        processor.insert("identifier".to_string(), Value::from(environment.processor.as_str()));
    }
    if !environment.properties.is_empty() {
        let properties: ValueMap = environment
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        processor.insert("properties".to_string(), Value::Map(properties));
    }

    let winget = metadata
        .entry(WINGET.to_string())
        .or_insert_with(|| Value::Map(ValueMap::new()));
    if let Value::Map(winget) = winget {
        winget.insert(PROCESSOR.to_string(), Value::Map(processor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = r#"
properties:
  configurationVersion: 0.2
  assertions:
    - resource: OsVersion
      id: os
      directives:
        description: Minimum OS version
      settings:
        MinVersion: "10.0.22000"
  parameters:
    - resource: Hostname
      id: host
  resources:
    - resource: Package
      id: editor
      dependsOn:
        - os
      directives:
        securityContext: elevated
      settings:
        id: Vim.Vim
        args:
          treatAsArray: true
          "1": --quiet
          "0": --silent
"#;

    const GROUPED: &str = r#"
$schema: https://aka.ms/configuration-dsc-schema/0.3
metadata:
  name: workstation
resources:
  - name: base
    type: Group
    properties:
      label: base tools
      resources:
        - name: git
          type: Package
          properties:
            id: Git.Git
        - name: check
          type: OsVersion
          metadata:
            intent: assert
  - name: profile
    type: File
    dependsOn: [base]
    metadata:
      description: shell profile
      isActive: false
      securityContext: restricted
    properties:
      path: ~/.profile
"#;

    #[test]
    fn test_open_flat_schema() {
        let set = open_set(FLAT).unwrap();
        assert_eq!(set.schema_version, "0.2");
        assert_eq!(set.units.len(), 3);

        let os = &set.units[0];
        assert_eq!(os.intent, Intent::Assert);
        assert_eq!(os.identifier, "os");
        assert_eq!(os.description(), Some("Minimum OS version"));
        assert_eq!(set.units[1].intent, Intent::Inform);

        let editor = &set.units[2];
        assert_eq!(editor.intent, Intent::Apply);
        assert_eq!(editor.dependencies, vec!["os".to_string()]);
        assert_eq!(
            editor.environment.as_ref().map(|e| e.context),
            Some(SecurityContext::Elevated)
        );
        assert!(!editor.metadata.contains_key(SECURITY_CONTEXT));
        assert_eq!(
            editor.settings["args"],
            Value::List(vec!["--silent".into(), "--quiet".into()])
        );
    }

    #[test]
    fn test_open_grouped_schema() {
        let set = open_set(GROUPED).unwrap();
        assert_eq!(set.schema_version, "0.3");
        assert_eq!(set.name, "workstation");

        let base = &set.units[0];
        assert!(base.is_group);
        assert_eq!(base.units.len(), 2);
        assert_eq!(base.units[1].intent, Intent::Assert);
        assert_eq!(base.settings.get("label"), Some(&Value::from("base tools")));
        assert!(!base.settings.contains_key(RESOURCES));

        let profile = &set.units[1];
        assert!(!profile.is_active);
        assert_eq!(profile.description(), Some("shell profile"));
        assert_eq!(
            profile.environment.as_ref().map(|e| e.context),
            Some(SecurityContext::Restricted)
        );
    }

    #[test]
    fn test_round_trip_through_latest_schema() {
        let original = open_set(GROUPED).unwrap();
        let reopened = open_set(&serialize_set(&original).unwrap()).unwrap();

        fn shape(units: &[ConfigurationUnit]) -> Vec<String> {
            units
                .iter()
                .map(|u| {
                    format!(
                        "{}|{}|{}|{:?}|{}|{:?}|{:?}|{:?}|{:?}",
                        u.identifier,
                        u.unit_type,
                        u.intent,
                        u.dependencies,
                        u.is_active,
                        u.environment,
                        u.settings,
                        u.metadata,
                        shape(&u.units)
                    )
                })
                .collect()
        }

        assert_eq!(shape(&original.units), shape(&reopened.units));
        assert_eq!(original.name, reopened.name);
    }

    #[test]
    fn test_invalid_yaml_has_location() {
        let err = open_set("resources: [unclosed\n  - x: {").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidYaml);
        assert!(err.line.is_some());
    }

    #[test]
    fn test_unknown_versions() {
        let err = open_set("properties:\n  configurationVersion: 9.9\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownConfigurationFileVersion);
        assert_eq!(err.value.as_deref(), Some("9.9"));

        let err = open_set("$schema: https://example.com/schema/1.0\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownConfigurationFileVersion);
        assert_eq!(err.field.as_deref(), Some(SCHEMA));
    }

    #[test]
    fn test_missing_fields() {
        let err = open_set("something: else\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.field.as_deref(), Some(SCHEMA));

        let err = open_set("properties:\n  resources: []\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.field.as_deref(), Some(CONFIGURATION_VERSION));

        let err = open_set("properties:\n  configurationVersion: 0.2\n  resources:\n    - id: x\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.field.as_deref(), Some("properties.resources[0].resource"));
    }

    #[test]
    fn test_invalid_field_types_and_values() {
        let err = open_set("properties: [1, 2]\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldType);

        let doc = "$schema: https://aka.ms/configuration-dsc-schema/0.3\nresources:\n  - name: a\n    type: T\n    dependsOn: b\n";
        let err = open_set(doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldType);
        assert_eq!(err.field.as_deref(), Some("resources[0].dependsOn"));

        let doc = "$schema: https://aka.ms/configuration-dsc-schema/0.3\nresources:\n  - name: a\n    type: T\n    metadata:\n      intent: sometimes\n";
        let err = open_set(doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
        assert_eq!(err.value.as_deref(), Some("sometimes"));

        let doc = "$schema: https://aka.ms/configuration-dsc-schema/0.3\nresources:\n  - name: a\n    type: T\n    properties:\n      ratio: 0.5\n";
        let err = open_set(doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
    }

    #[test]
    fn test_dsc_document_schema_maps_to_latest() {
        let doc = format!("$schema: {DSC_DOCUMENT_SCHEMA}\nresources: []\n");
        assert_eq!(open_set(&doc).unwrap().schema_version, "0.3");
    }
}
