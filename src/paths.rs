//! Path resolution for confctl
//!
//! # Environment Variables
//!
//! - `CONFCTL_CONFIG_DIR` - Override config directory
//! - `CONFCTL_STATE_DIR` - Override state directory (history lives here)
//!
//! For config_dir():
//! 1. `CONFCTL_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/confctl` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\confctl`
//!    - macOS/Linux: `~/.config/confctl`
//!
//! For state_dir():
//! 1. `CONFCTL_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/confctl` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\confctl`
//!    - macOS/Linux: `~/.local/state/confctl`

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const ENV_CONFIG_DIR: &str = "CONFCTL_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "CONFCTL_STATE_DIR";

const APP_DIR: &str = "confctl";

pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP_DIR))
}

pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join(APP_DIR))
}

/// Default location of recorded applies
pub fn history_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("history"))
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as they are.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
