//! Persistent record of applied sets

use crate::error::{Error, Result};
use crate::set::ConfigurationSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Stores applied sets as `<dir>/<instance id>.json`
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::History {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Record `set`, replacing any earlier entry for the same instance.
    ///
    /// The earliest first-apply time seen for the instance is kept.
    pub fn record(&self, set: &ConfigurationSet) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;

        let mut entry = set.clone();
        if let Ok(previous) = self.get(set.instance_id) {
            entry.first_apply = match (previous.first_apply, entry.first_apply) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        let path = self.entry_path(set.instance_id);
        let content = serde_json::to_string_pretty(&entry)?;
        fs::write(&path, content).map_err(Self::io_error(&path))?;

        log::debug!("Recorded set {} in {}", set.instance_id, path.display());
        Ok(())
    }

    /// Load the entry recorded for `id`
    pub fn get(&self, id: Uuid) -> Result<ConfigurationSet> {
        let path = self.entry_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::HistoryNotFound(id.to_string()));
            }
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// All recorded sets, most recently applied first
    pub fn list(&self) -> Result<Vec<ConfigurationSet>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&self.dir)(e)),
        };

        let mut sets = Vec::new();
        for entry in entries {
            let path = entry.map_err(Self::io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match self.get(id) {
                Ok(set) => sets.push(set),
                Err(e) => log::warn!("Skipping unreadable history entry {}: {e}", path.display()),
            }
        }

        sets.sort_by(|a, b| {
            b.apply_begun
                .cmp(&a.apply_begun)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(sets)
    }

    /// Forget the entry for `id`
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let path = self.entry_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed history entry {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::HistoryNotFound(id.to_string())),
            Err(e) => Err(Self::io_error(&path)(e)),
        }
    }
}
