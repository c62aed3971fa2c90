//! Configuration module for Mirage.
//!
//! This module provides the settings types, loading functionality and the
//! locations of Mirage's files.
//!
//! The settings file supports JSONC format (JSON with comments).
//! Both single-line (`//`) and multi-line (`/* */`) comments are allowed.

pub mod template;
pub mod types;

use std::path::PathBuf;
use std::sync::OnceLock;

pub use types::{
    APP_DIR_NAME, ConfigError, FleetSettings, IdentityConfig, MirageConfig, StabilityConfig,
    config_dirs, config_paths, load_config as load_config_default, load_config_from_path,
};

/// File name of the persisted display list.
pub const STORE_FILE_NAME: &str = "displays.json";

/// Global configuration instance, loaded once at startup.
static CONFIG: OnceLock<MirageConfig> = OnceLock::new();

/// Path to the currently loaded settings file.
static CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Custom settings path override (set via CLI --config flag).
static CUSTOM_CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Sets a custom settings file path to use instead of the default search paths.
///
/// This must be called before `init()` or `get_config()` to take effect.
/// Returns `false` if a path was already set.
pub fn set_custom_config_path(path: PathBuf) -> bool { CUSTOM_CONFIG_PATH.set(path).is_ok() }

/// Loads the settings from disk, falling back to defaults.
///
/// If no settings file exists at all, a commented template is written to the
/// preferred location.
fn load_or_default() -> MirageConfig {
    let result = CUSTOM_CONFIG_PATH
        .get()
        .map_or_else(load_config_default, |path| load_config_from_path(path));

    match result {
        Ok((config, path)) => {
            tracing::debug!(path = %path.display(), "settings loaded");
            let _ = CONFIG_PATH.set(path);
            config
        }
        Err(ConfigError::NotFound) => {
            if CUSTOM_CONFIG_PATH.get().is_none() {
                create_default_config_file();
            }
            MirageConfig::default()
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            MirageConfig::default()
        }
    }
}

/// Writes the settings template to the preferred location.
fn create_default_config_file() {
    let Some(config_path) = config_paths().into_iter().next() else {
        tracing::debug!("no settings path available for creating template");
        return;
    };

    if config_path.exists() {
        return;
    }

    match template::create_config_file(&config_path) {
        Ok(()) => {
            tracing::info!(path = %config_path.display(), "created default settings file");
        }
        Err(err) => {
            tracing::debug!(
                error = %err,
                path = %config_path.display(),
                "failed to create default settings file"
            );
        }
    }
}

/// Initializes and returns the global configuration instance.
///
/// This function is idempotent - calling it multiple times will return
/// the same configuration instance.
pub fn init() -> &'static MirageConfig { CONFIG.get_or_init(load_or_default) }

/// Returns the global configuration instance, initializing it if necessary.
pub fn get_config() -> &'static MirageConfig { CONFIG.get_or_init(load_or_default) }

/// Returns the path to the loaded settings file, if any.
pub fn get_config_path() -> Option<&'static PathBuf> { CONFIG_PATH.get() }

/// Resolves where the display list lives.
///
/// An explicit `override_path` wins, then `storePath` from the settings, then
/// `displays.json` in the directory of the loaded settings file, then the
/// preferred config directory.
#[must_use]
pub fn store_path(config: &MirageConfig, override_path: Option<PathBuf>) -> PathBuf {
    override_path
        .or_else(|| config.store_path.clone())
        .or_else(|| {
            get_config_path().and_then(|p| p.parent()).map(|dir| dir.join(STORE_FILE_NAME))
        })
        .or_else(|| config_dirs().into_iter().next().map(|dir| dir.join(STORE_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(STORE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_over_settings() {
        let config = MirageConfig {
            store_path: Some(PathBuf::from("/tmp/from-settings.json")),
            ..MirageConfig::default()
        };
        let path = store_path(&config, Some(PathBuf::from("/tmp/override.json")));
        assert_eq!(path, PathBuf::from("/tmp/override.json"));
    }

    #[test]
    fn test_settings_store_path_is_used() {
        let config = MirageConfig {
            store_path: Some(PathBuf::from("/tmp/from-settings.json")),
            ..MirageConfig::default()
        };
        assert_eq!(store_path(&config, None), PathBuf::from("/tmp/from-settings.json"));
    }

    #[test]
    fn test_default_store_file_name() {
        let path = store_path(&MirageConfig::default(), None);
        assert!(path.ends_with(STORE_FILE_NAME));
    }
}
