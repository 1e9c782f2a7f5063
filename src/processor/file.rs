//! File resource
//!
//! Settings:
//! - `path` (required)
//! - `content`: desired content; when absent only existence is checked
//! - `ensure`: `present` (default) or `absent`

use super::{io_failure, optional_str, path_setting};
use configuration::{ApplySettingsResult, ErrorCode, ProcessorError, UnitProcessor, Value, ValueMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    Present,
    Absent,
}

#[derive(Debug, Clone)]
pub struct FileUnit {
    pub path: PathBuf,
    pub content: Option<String>,
    pub ensure: Ensure,
}

impl FileUnit {
    pub fn from_settings(settings: &ValueMap) -> Result<Self, ProcessorError> {
        let ensure = match optional_str(settings, "ensure")?.map(str::to_ascii_lowercase).as_deref() {
            None | Some("present") => Ensure::Present,
            Some("absent") => Ensure::Absent,
            Some(other) => {
                return Err(ProcessorError::Invocation {
                    code: ErrorCode::InvalidFieldValue,
                    message: format!("unknown ensure value: {other}"),
                });
            }
        };
        Ok(Self {
            path: path_setting(settings, "path")?,
            content: optional_str(settings, "content")?.map(str::to_string),
            ensure,
        })
    }

    fn current_hash(&self) -> io::Result<Option<blake3::Hash>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(blake3::hash(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn describe(path: &Path, bytes: &[u8]) -> ValueMap {
    let mut settings = ValueMap::new();
    settings.insert("path".into(), Value::from(path.display().to_string()));
    settings.insert("hash".into(), Value::from(blake3::hash(bytes).to_hex().to_string()));
    settings.insert("size".into(), Value::Int(i64::try_from(bytes.len()).unwrap_or(i64::MAX)));
    settings
}

impl UnitProcessor for FileUnit {
    fn get_settings(&self) -> Result<ValueMap, ProcessorError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let mut settings = describe(&self.path, &bytes);
                settings.insert("ensure".into(), Value::from("present"));
                if let Ok(text) = String::from_utf8(bytes) {
                    settings.insert("content".into(), Value::from(text));
                }
                Ok(settings)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut settings = ValueMap::new();
                settings.insert("path".into(), Value::from(self.path.display().to_string()));
                settings.insert("ensure".into(), Value::from("absent"));
                Ok(settings)
            }
            Err(e) => Err(io_failure(ErrorCode::UnitInvokeGet, "failed to read file", &e)),
        }
    }

    fn test_settings(&self) -> Result<bool, ProcessorError> {
        let current = self
            .current_hash()
            .map_err(|e| io_failure(ErrorCode::UnitInvokeTest, "failed to read file", &e))?;

        Ok(match (self.ensure, current, &self.content) {
            (Ensure::Absent, current, _) => current.is_none(),
            (Ensure::Present, None, _) => false,
            (Ensure::Present, Some(_), None) => true,
            (Ensure::Present, Some(hash), Some(content)) => hash == blake3::hash(content.as_bytes()),
        })
    }

    fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError> {
        match self.ensure {
            Ensure::Absent => match fs::remove_file(&self.path) {
                Ok(()) => log::info!("Removed {}", self.path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_failure(ErrorCode::UnitInvokeSet, "failed to remove file", &e)),
            },
            Ensure::Present => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| io_failure(ErrorCode::UnitInvokeSet, "failed to create parent directory", &e))?;
                }
                fs::write(&self.path, self.content.as_deref().unwrap_or_default())
                    .map_err(|e| io_failure(ErrorCode::UnitInvokeSet, "failed to write file", &e))?;
                log::info!("Wrote {}", self.path.display());
            }
        }
        Ok(ApplySettingsResult::default())
    }

    /// Every file under `path` (or under its parent when `path` is a file)
    fn get_all_settings(&self) -> Result<Vec<ValueMap>, ProcessorError> {
        let root = if self.path.is_dir() {
            self.path.as_path()
        } else {
            self.path.parent().unwrap_or(&self.path)
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| ProcessorError::Invocation {
                code: ErrorCode::GetFailed,
                message: format!("failed to enumerate {}: {e}", root.display()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())
                .map_err(|e| io_failure(ErrorCode::GetFailed, "failed to read file", &e))?;
            files.push(describe(entry.path(), &bytes));
        }
        Ok(files)
    }
}
