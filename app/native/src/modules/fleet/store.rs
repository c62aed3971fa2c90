//! Persistence of the ordered display config list.
//!
//! The on-disk file is a schema-versioned JSON document:
//!
//! ```json
//! { "version": 1, "displays": [ { "id": "...", "serialNum": 1, ... } ] }
//! ```
//!
//! A bare array of configs (written by early releases) is accepted and treated
//! as version 0. Every load runs [`sanitize`], which repairs colliding serials,
//! duplicate ids, empty mode lists and blank names.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::types::{DEFAULT_MODE, DisplayConfig};

/// Current schema version written by [`FileConfigStore`].
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised while loading or saving the display list.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file could not be read or written.
    #[error("display store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for any known schema.
    #[error("display store is malformed: {0}")]
    Parse(#[from] serde_json::Error),

    /// The file was written by a newer release.
    #[error("display store schema version {0} is newer than supported")]
    UnsupportedVersion(u32),
}

/// Storage backend for the display list.
pub trait ConfigPersistence: Send + Sync {
    /// Loads and sanitizes the persisted list.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or parsed.
    fn load(&self) -> Result<Vec<DisplayConfig>, StoreError>;

    /// Replaces the persisted list.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn save(&self, configs: &[DisplayConfig]) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct PersistedFleet {
    version: u32,
    #[serde(default)]
    displays: Vec<DisplayConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Versioned(PersistedFleet),
    Legacy(Vec<DisplayConfig>),
}

// ============================================================================
// File Store
// ============================================================================

/// JSON file store, written atomically.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self { Self { path } }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Parses a store document and sanitizes its contents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] for malformed input and
    /// [`StoreError::UnsupportedVersion`] for documents from newer releases.
    pub fn parse(contents: &str) -> Result<Vec<DisplayConfig>, StoreError> {
        let configs = match serde_json::from_str::<OnDisk>(contents)? {
            OnDisk::Versioned(doc) if doc.version > SCHEMA_VERSION => {
                return Err(StoreError::UnsupportedVersion(doc.version));
            }
            OnDisk::Versioned(doc) => doc.displays,
            OnDisk::Legacy(displays) => displays,
        };
        Ok(sanitize(configs))
    }
}

impl ConfigPersistence for FileConfigStore {
    fn load(&self) -> Result<Vec<DisplayConfig>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Self::parse(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no display store yet");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, configs: &[DisplayConfig]) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let doc = PersistedFleet {
            version: SCHEMA_VERSION,
            displays: configs.to_vec(),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &doc)?;
        file.write_all(b"\n")?;
        file.persist(&self.path).map_err(|err| StoreError::Io(err.error))?;

        tracing::trace!(path = %self.path.display(), count = configs.len(), "display store saved");
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store that counts saves; used by the simulator and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    configs: Vec<DisplayConfig>,
    saves: usize,
}

impl MemoryConfigStore {
    /// Creates a store pre-populated with `configs` (sanitized, as a load would be).
    #[must_use]
    pub fn with_configs(configs: Vec<DisplayConfig>) -> Self {
        let store = Self::default();
        store.inner.lock().configs = sanitize(configs);
        store
    }

    /// Number of times [`ConfigPersistence::save`] has been called.
    #[must_use]
    pub fn save_count(&self) -> usize { self.inner.lock().saves }

    /// The most recently saved list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DisplayConfig> { self.inner.lock().configs.clone() }
}

impl ConfigPersistence for MemoryConfigStore {
    fn load(&self) -> Result<Vec<DisplayConfig>, StoreError> { Ok(self.snapshot()) }

    fn save(&self, configs: &[DisplayConfig]) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.configs = configs.to_vec();
        state.saves += 1;
        Ok(())
    }
}

// ============================================================================
// Sanitation
// ============================================================================

/// Repairs a loaded config list.
///
/// - Duplicate ids: later occurrences get a fresh id.
/// - Colliding serials: the first occurrence keeps its serial, the rest get the
///   smallest serial not used anywhere in the list.
/// - Empty mode lists get one default mode.
/// - Blank names get a generated default.
#[must_use]
pub fn sanitize(mut configs: Vec<DisplayConfig>) -> Vec<DisplayConfig> {
    let mut seen_ids = HashSet::new();
    for config in &mut configs {
        if !seen_ids.insert(config.id) {
            let fresh = Uuid::now_v7();
            tracing::warn!(old = %config.id, new = %fresh, "duplicate display id reassigned");
            config.id = fresh;
            seen_ids.insert(fresh);
        }
    }

    let mut used: HashSet<u32> = configs.iter().map(|c| c.serial_num).collect();
    let mut kept = HashSet::new();
    for config in &mut configs {
        if kept.insert(config.serial_num) {
            continue;
        }
        let fresh = smallest_unused_serial(&used);
        tracing::warn!(
            config_id = %config.id,
            old = config.serial_num,
            new = fresh,
            "colliding serial number reassigned"
        );
        config.serial_num = fresh;
        used.insert(fresh);
        kept.insert(fresh);
    }

    for config in &mut configs {
        if config.modes.is_empty() {
            tracing::warn!(config_id = %config.id, "display had no modes, using default");
            config.modes.push(DEFAULT_MODE);
        }
        if config.name.trim().is_empty() {
            config.name = DisplayConfig::default_name(config.serial_num);
        }
    }

    configs
}

/// Smallest serial (starting at 1) not contained in `used`.
#[must_use]
pub fn smallest_unused_serial(used: &HashSet<u32>) -> u32 {
    (1..=u32::MAX).find(|serial| !used.contains(serial)).unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
