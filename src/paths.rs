//! Path resolution for keel
//!
//! # Environment Variables
//!
//! - `KEEL_CONFIG` - Override the configuration file
//! - `KEEL_STATE_DIR` - Override the directory holding `<stack>.json` state files
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` flag
//! 2. `KEEL_CONFIG` environment variable
//! 3. `./keel.toml`
//!
//! For state_dir():
//! 1. `--state-dir` flag
//! 2. `KEEL_STATE_DIR` environment variable
//! 3. `XDG_STATE_HOME/keel` (if set)
//! 4. Platform default:
//!    - Windows: `%LOCALAPPDATA%\keel`
//!    - macOS/Linux: `~/.local/state/keel`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the configuration file override
pub const ENV_CONFIG: &str = "KEEL_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KEEL_STATE_DIR";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";

/// Get the configuration file path
pub fn config_file(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        log::debug!("Using config file from --config: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(file) = std::env::var(ENV_CONFIG) {
        let path = expand(&file);
        log::debug!("Using config file from {}: {}", ENV_CONFIG, path.display());
        return path;
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Get the keel state directory path
pub fn state_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        log::debug!("Using state dir from --state-dir: {}", path.display());
        return Ok(path.to_path_buf());
    }

    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("keel");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("keel");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("keel");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// State file of one stack inside the state directory
pub fn state_file(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(format!("{stack}.json"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
