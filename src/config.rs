//! User settings for confctl (`config.toml` in the config directory)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Units processed at once
    pub jobs: usize,
    /// Where applied sets are recorded; defaults to the state directory
    pub history_dir: Option<String>,
    pub record_history: bool,
    /// Ask before applying
    pub confirm: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: configuration::DEFAULT_JOBS,
            history_dir: None,
            record_history: true,
            confirm: true,
        }
    }
}

impl Settings {
    /// Load from the config directory, or defaults if there is no file
    pub fn load() -> Result<Self> {
        Self::load_from(&crate::paths::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_dir {
            Some(dir) => Ok(crate::paths::expand(dir)),
            None => crate::paths::history_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.jobs, 4);
        assert!(settings.confirm);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jobs = 8\nhistory_dir = \"/var/tmp/confctl\"\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.jobs, 8);
        assert!(settings.record_history);
        assert_eq!(settings.history_path().unwrap(), PathBuf::from("/var/tmp/confctl"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jobs = \"many\"\n").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
