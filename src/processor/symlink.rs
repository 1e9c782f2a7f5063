//! Symlink resource
//!
//! Settings: `source` (what the link points to) and `target` (where the link
//! is created), both required.

use super::{io_failure, path_setting};
use configuration::{ApplySettingsResult, ErrorCode, ProcessorError, UnitProcessor, Value, ValueMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SymlinkUnit {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum SymlinkState {
    Missing,
    Correct,
    WrongTarget(PathBuf),
    FileExists,
}

impl SymlinkState {
    fn name(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Correct => "correct",
            Self::WrongTarget(_) => "wrongTarget",
            Self::FileExists => "fileExists",
        }
    }
}

impl SymlinkUnit {
    pub fn new(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        }
    }

    pub fn from_settings(settings: &ValueMap) -> Result<Self, ProcessorError> {
        Ok(Self::new(
            path_setting(settings, "source")?,
            path_setting(settings, "target")?,
        ))
    }

    fn check_current(&self) -> io::Result<SymlinkState> {
        if !self.target.exists() && !self.target.is_symlink() {
            return Ok(SymlinkState::Missing);
        }
        if !self.target.is_symlink() {
            return Ok(SymlinkState::FileExists);
        }

        let link_target = fs::read_link(&self.target)?;

        // Canonicalize for comparison
        let expected = self.source.canonicalize().unwrap_or_else(|_| self.source.clone());
        let actual = if link_target.is_absolute() {
            link_target.canonicalize().unwrap_or(link_target)
        } else {
            self.target
                .parent()
                .map(|p| p.join(&link_target))
                .and_then(|p| p.canonicalize().ok())
                .unwrap_or(link_target)
        };

        if expected == actual {
            Ok(SymlinkState::Correct)
        } else {
            Ok(SymlinkState::WrongTarget(actual))
        }
    }

    fn create_symlink(&self) -> io::Result<()> {
        if !self.source.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source does not exist: {}", self.source.display()),
            ));
        }
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.target.is_symlink() {
            fs::remove_file(&self.target)?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&self.source, &self.target)?;

        #[cfg(windows)]
        {
            use std::os::windows::fs::{symlink_dir, symlink_file};

            if self.source.is_dir() {
                // Junctions need no special privileges
                if let Err(e) = junction::create(&self.source, &self.target) {
                    log::debug!("Junction creation failed ({e}), trying symlink_dir");
                    symlink_dir(&self.source, &self.target)?;
                }
            } else {
                symlink_file(&self.source, &self.target)?;
            }
        }

        #[cfg(not(any(unix, windows)))]
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symlinks are not supported on this platform",
        ));

        Ok(())
    }
}

impl UnitProcessor for SymlinkUnit {
    fn get_settings(&self) -> Result<ValueMap, ProcessorError> {
        let state = self
            .check_current()
            .map_err(|e| io_failure(ErrorCode::UnitInvokeGet, "failed to read symlink", &e))?;

        let mut settings = ValueMap::new();
        settings.insert("target".into(), Value::from(self.target.display().to_string()));
        if let SymlinkState::WrongTarget(actual) = &state {
            settings.insert("source".into(), Value::from(actual.display().to_string()));
        } else if state == SymlinkState::Correct {
            settings.insert("source".into(), Value::from(self.source.display().to_string()));
        }
        settings.insert("state".into(), Value::from(state.name()));
        Ok(settings)
    }

    fn test_settings(&self) -> Result<bool, ProcessorError> {
        let state = self
            .check_current()
            .map_err(|e| io_failure(ErrorCode::UnitInvokeTest, "failed to read symlink", &e))?;
        Ok(state == SymlinkState::Correct)
    }

    fn apply_settings(&self) -> Result<ApplySettingsResult, ProcessorError> {
        let state = self
            .check_current()
            .map_err(|e| io_failure(ErrorCode::UnitInvokeSet, "failed to read symlink", &e))?;

        match state {
            SymlinkState::Correct => {}
            // Existing files are never replaced
            SymlinkState::FileExists => {
                return Err(ProcessorError::Invocation {
                    code: ErrorCode::UnitInvokeSet,
                    message: format!("a file already exists at {}", self.target.display()),
                });
            }
            SymlinkState::Missing | SymlinkState::WrongTarget(_) => {
                self.create_symlink()
                    .map_err(|e| io_failure(ErrorCode::UnitInvokeSet, "failed to create symlink", &e))?;
                log::info!("Linked {} -> {}", self.target.display(), self.source.display());
            }
        }
        Ok(ApplySettingsResult::default())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_detect() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dotfiles").join("vimrc");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "set number").unwrap();
        let target = dir.path().join("home").join(".vimrc");

        let unit = SymlinkUnit::new(&source, &target);
        assert!(!unit.test_settings().unwrap());
        unit.apply_settings().unwrap();
        assert!(unit.test_settings().unwrap());
        assert_eq!(unit.get_settings().unwrap().get("state"), Some(&Value::from("correct")));
    }

    #[test]
    fn test_wrong_target_is_relinked() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        fs::write(&old, "").unwrap();
        fs::write(&new, "").unwrap();
        let target = dir.path().join("link");
        std::os::unix::fs::symlink(&old, &target).unwrap();

        let unit = SymlinkUnit::new(&new, &target);
        assert_eq!(unit.get_settings().unwrap().get("state"), Some(&Value::from("wrongTarget")));
        unit.apply_settings().unwrap();
        assert!(unit.test_settings().unwrap());
    }

    #[test]
    fn test_existing_file_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        fs::write(&source, "").unwrap();
        fs::write(&target, "keep me").unwrap();

        let unit = SymlinkUnit::new(&source, &target);
        let err = unit.apply_settings().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnitInvokeSet);
        assert_eq!(fs::read_to_string(&target).unwrap(), "keep me");
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let unit = SymlinkUnit::new(dir.path().join("nope"), dir.path().join("link"));
        assert!(unit.apply_settings().is_err());
    }
}
