//! Configuration types for Mirage.
//!
//! The settings file supports JSONC format (JSON with comments).
//! Both single-line (`//`) and multi-line (`/* */`) comments are allowed.

pub mod fleet;

use std::fs;
use std::path::{Path, PathBuf};

pub use fleet::{FleetSettings, IdentityConfig, StabilityConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MirageConfig {
    /// JSON schema reference, ignored at runtime.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Path of the display list. Defaults to `displays.json` next to the settings.
    pub store_path: Option<PathBuf>,

    /// Lifecycle timing and layout of the display fleet.
    pub fleet: FleetSettings,
}

/// Errors that can occur when loading the settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No settings file was found in any of the expected locations.
    #[error(
        "No settings file found. Expected at ~/.config/mirage/settings.jsonc or \
         ~/Library/Application Support/mirage/settings.jsonc"
    )]
    NotFound,
    /// The settings file exists but could not be read.
    #[error("Failed to read settings file: {0}")]
    IoError(#[from] std::io::Error),
    /// The settings file contains invalid JSON.
    #[error("Failed to parse settings file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Settings file names to search for (in priority order).
const CONFIG_FILE_NAMES: &[&str] = &["settings.jsonc", "settings.json"];

/// Directory name used under every base directory.
pub const APP_DIR_NAME: &str = "mirage";

/// Returns the directories that may hold Mirage's files, in priority order.
///
/// 1. `$XDG_CONFIG_HOME/mirage` if set
/// 2. `~/.config/mirage`
/// 3. the platform config dir (`~/Library/Application Support/mirage` on macOS)
#[must_use]
pub fn config_dirs() -> Vec<PathBuf> {
    let mut dirs_found = Vec::new();

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        dirs_found.push(PathBuf::from(xdg_config).join(APP_DIR_NAME));
    }

    if let Some(home) = dirs::home_dir() {
        let dir = home.join(".config").join(APP_DIR_NAME);
        if !dirs_found.contains(&dir) {
            dirs_found.push(dir);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let dir = config_dir.join(APP_DIR_NAME);
        if !dirs_found.contains(&dir) {
            dirs_found.push(dir);
        }
    }

    dirs_found
}

/// Returns the possible settings file paths in priority order.
#[must_use]
pub fn config_paths() -> Vec<PathBuf> {
    config_dirs()
        .into_iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

/// Loads the settings from the first available settings file.
///
/// # Errors
///
/// Returns `ConfigError::NotFound` if no settings file exists in any of the expected locations.
/// Returns `ConfigError::IoError` if a settings file exists but could not be read.
/// Returns `ConfigError::ParseError` if the settings file contains invalid JSON.
pub fn load_config() -> Result<(MirageConfig, PathBuf), ConfigError> {
    for path in config_paths() {
        if path.exists() {
            return load_config_from_path(&path);
        }
    }

    Err(ConfigError::NotFound)
}

/// Loads the settings from a specific file.
///
/// # Errors
///
/// Returns `ConfigError::NotFound` if the file does not exist, or the I/O and
/// parse errors of [`load_config`].
pub fn load_config_from_path(path: &Path) -> Result<(MirageConfig, PathBuf), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound);
    }
    let file = fs::File::open(path)?;
    let reader = json_comments::StripComments::new(file);
    let config: MirageConfig = serde_json::from_reader(reader)?;
    Ok((config, path.to_path_buf()))
}
