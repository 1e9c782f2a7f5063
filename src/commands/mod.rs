pub mod apply;
pub mod history;
pub mod inspect;

use anyhow::{Context as AnyhowContext, Result};
use configuration::{ConfigurationProcessor, ConfigurationSet, ConfigurationUnit, HistoryStore, fold_identifier};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::processor::BuiltinFactory;

/// Read and parse a configuration document
pub fn load_set(path: &Path) -> Result<ConfigurationSet> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut set = configuration::open_set(&content)
        .with_context(|| format!("Invalid configuration document: {}", path.display()))?;

    set.path = path.display().to_string();
    set.origin = path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    if set.name.is_empty() {
        set.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }
    log::debug!("Loaded {} units from {}", set.units.len(), path.display());
    Ok(set)
}

/// Engine backed by the built-in processor
pub fn engine(settings: &Settings, jobs: Option<usize>) -> ConfigurationProcessor {
    ConfigurationProcessor::new(Arc::new(BuiltinFactory)).with_jobs(jobs.unwrap_or(settings.jobs))
}

pub fn history_store(settings: &Settings) -> Result<HistoryStore> {
    Ok(HistoryStore::new(settings.history_path()?))
}

/// Find a unit by identifier anywhere in the set, groups included
pub fn find_unit<'a>(units: &'a [ConfigurationUnit], identifier: &str) -> Option<&'a ConfigurationUnit> {
    let folded = fold_identifier(identifier);
    units.iter().find_map(|unit| {
        if unit.folded_identifier() == folded {
            Some(unit)
        } else {
            find_unit(&unit.units, identifier)
        }
    })
}

/// Active units, groups counted with their children
pub fn active_unit_count(units: &[ConfigurationUnit]) -> usize {
    units
        .iter()
        .filter(|u| u.is_active)
        .map(|u| 1 + active_unit_count(&u.units))
        .sum()
}
