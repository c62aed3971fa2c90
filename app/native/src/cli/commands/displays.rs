//! Display list commands.
//!
//! These commands edit the persisted display list directly. A running fleet
//! picks the changes up on its next restore. Serial uniqueness is checked
//! against the list and, where the host exposes its topology, against the
//! managed displays currently online.

use std::collections::HashSet;
use std::path::PathBuf;

use colored::Colorize;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};
use tabled::{Table, Tabled};

use crate::cli::output;
use crate::config;
use crate::error::MirageError;
use crate::modules::fleet::manager::{
    validate_mode_envelope, validate_modes, validate_name, validate_physical_size,
};
use crate::modules::fleet::store::{ConfigPersistence, FileConfigStore, smallest_unused_serial};
use crate::modules::fleet::topology::TopologySnapshot;
use crate::modules::fleet::types::{
    DEFAULT_MODE, DisplayConfig, DisplayMode, MoveDirection, PhysicalSize, PixelSize,
};
use crate::modules::fleet::FleetError;
use crate::platform;

/// Serials of managed displays the host currently reports online.
fn online_managed_serials() -> HashSet<u32> {
    let Some(inspector) = platform::host_inspector() else {
        return HashSet::new();
    };
    match inspector.enumerate_online_displays() {
        Ok(enumeration) => {
            let identity = config::get_config().fleet.identity();
            TopologySnapshot::from_enumeration(enumeration, identity)
                .managed()
                .map(|d| d.serial_number)
                .collect()
        }
        Err(err) => {
            tracing::warn!(error = %err, "could not enumerate online displays");
            HashSet::new()
        }
    }
}

/// The persisted display list plus what is needed to validate edits.
pub struct Catalog {
    store: Option<FileConfigStore>,
    configs: Vec<DisplayConfig>,
    online_serials: HashSet<u32>,
}

/// Arguments of a new display.
#[derive(Debug, Clone)]
pub struct NewDisplay {
    pub name: String,
    pub serial: Option<u32>,
    pub physical_size: PhysicalSize,
    pub modes: Vec<DisplayMode>,
    pub max_pixels: Option<PixelSize>,
    pub enabled: bool,
}

impl Catalog {
    /// Loads the list at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list exists but cannot be read.
    pub fn open(path: PathBuf) -> Result<Self, MirageError> {
        let store = FileConfigStore::new(path);
        let configs = store.load()?;
        Ok(Self {
            store: Some(store),
            configs,
            online_serials: online_managed_serials(),
        })
    }

    /// A catalog that is never written back.
    #[cfg(test)]
    #[must_use]
    pub const fn in_memory(configs: Vec<DisplayConfig>, online_serials: HashSet<u32>) -> Self {
        Self { store: None, configs, online_serials }
    }

    #[must_use]
    pub fn configs(&self) -> &[DisplayConfig] { &self.configs }

    #[must_use]
    pub fn is_online(&self, serial: u32) -> bool { self.online_serials.contains(&serial) }

    fn save(&self) -> Result<(), MirageError> {
        if let Some(store) = &self.store {
            store.save(&self.configs)?;
        }
        Ok(())
    }

    /// Finds a display by id, serial number or name (case-insensitive).
    fn resolve(&self, target: &str) -> Result<usize, MirageError> {
        let by_id = self.configs.iter().position(|c| c.id.to_string() == target);
        let by_serial = || {
            target
                .parse::<u32>()
                .ok()
                .and_then(|serial| self.configs.iter().position(|c| c.serial_num == serial))
        };
        let by_name = || self.configs.iter().position(|c| c.name.eq_ignore_ascii_case(target));

        by_id
            .or_else(by_serial)
            .or_else(by_name)
            .ok_or_else(|| MirageError::InvalidArguments(format!("No display matches '{target}'.")))
    }

    /// Smallest serial used neither in the list nor by an online managed display.
    #[must_use]
    pub fn next_serial(&self) -> u32 {
        let mut used: HashSet<u32> = self.configs.iter().map(|c| c.serial_num).collect();
        used.extend(&self.online_serials);
        smallest_unused_serial(&used)
    }

    fn ensure_serial_available(&self, serial: u32, except: Option<usize>) -> Result<(), FleetError> {
        if serial == 0 {
            return Err(FleetError::InvalidConfiguration("serial number must be non-zero".to_string()));
        }
        let taken = self
            .configs
            .iter()
            .enumerate()
            .any(|(i, c)| Some(i) != except && c.serial_num == serial);
        if taken || self.online_serials.contains(&serial) {
            return Err(FleetError::DuplicateSerialNumber(serial));
        }
        Ok(())
    }

    /// Appends a display.
    ///
    /// # Errors
    ///
    /// Returns a validation or storage error.
    pub fn add(&mut self, new: NewDisplay) -> Result<&DisplayConfig, MirageError> {
        let modes = if new.modes.is_empty() { vec![DEFAULT_MODE] } else { new.modes };
        validate_name(&new.name)?;
        validate_physical_size(new.physical_size)?;
        validate_modes(&modes)?;
        if let Some(max_pixels) = new.max_pixels {
            validate_mode_envelope(&modes, max_pixels)?;
        }
        let serial = new.serial.unwrap_or_else(|| self.next_serial());
        self.ensure_serial_available(serial, None)?;

        let mut config = DisplayConfig::new(new.name.trim(), serial, new.physical_size, modes);
        config.desired_enabled = new.enabled;
        self.configs.push(config);
        self.save()?;
        Ok(&self.configs[self.configs.len() - 1])
    }

    /// Removes a display.
    ///
    /// # Errors
    ///
    /// Returns an error if no display matches or the list cannot be saved.
    pub fn remove(&mut self, target: &str) -> Result<DisplayConfig, MirageError> {
        let index = self.resolve(target)?;
        let removed = self.configs.remove(index);
        self.save()?;
        Ok(removed)
    }

    /// Moves a display one slot. Returns `false` at the boundary, without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if no display matches or the list cannot be saved.
    pub fn move_display(&mut self, target: &str, direction: MoveDirection) -> Result<bool, MirageError> {
        let index = self.resolve(target)?;
        let other = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => Some(index + 1).filter(|i| *i < self.configs.len()),
        };
        let Some(other) = other else {
            return Ok(false);
        };
        self.configs.swap(index, other);
        self.save()?;
        Ok(true)
    }

    /// Replaces the mode list of a display.
    ///
    /// # Errors
    ///
    /// Returns a validation or storage error.
    pub fn set_modes(&mut self, target: &str, modes: Vec<DisplayMode>) -> Result<(), MirageError> {
        validate_modes(&modes)?;
        let index = self.resolve(target)?;
        self.configs[index].modes = modes;
        self.save()
    }

    /// Renames a display.
    ///
    /// # Errors
    ///
    /// Returns a validation or storage error.
    pub fn rename(&mut self, target: &str, name: &str) -> Result<(), MirageError> {
        validate_name(name)?;
        let index = self.resolve(target)?;
        self.configs[index].name = name.trim().to_string();
        self.save()
    }
}

// ============================================================================
// Output
// ============================================================================

/// Prints the display list as a table or JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_list(catalog: &Catalog, json: bool) -> Result<(), MirageError> {
    #[derive(Tabled)]
    struct DisplayRow {
        #[tabled(rename = "#")]
        position: usize,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Serial")]
        serial: u32,
        #[tabled(rename = "Size (mm)")]
        size: String,
        #[tabled(rename = "Modes")]
        modes: String,
        #[tabled(rename = "Enabled")]
        enabled: String,
        #[tabled(rename = "Online")]
        online: String,
    }

    if json {
        output::print_highlighted_json(&serde_json::to_value(catalog.configs())?);
        return Ok(());
    }

    if catalog.configs().is_empty() {
        println!("{}", "No displays configured.".dimmed());
        return Ok(());
    }

    let rows: Vec<DisplayRow> = catalog
        .configs()
        .iter()
        .enumerate()
        .map(|(i, c)| DisplayRow {
            position: i + 1,
            name: output::truncate(&c.name, 32),
            serial: c.serial_num,
            size: format!("{}x{}", c.physical_width_mm, c.physical_height_mm),
            modes: c.modes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            enabled: output::format_bool(c.desired_enabled),
            online: output::format_bool(catalog.is_online(c.serial_num)),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .with(Modify::new(Columns::new(5..7)).with(Alignment::center()))
        .to_string();

    println!("{}", format!("Displays ({})", catalog.configs().len()).bold());
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_display(name: &str, serial: Option<u32>) -> NewDisplay {
        NewDisplay {
            name: name.to_string(),
            serial,
            physical_size: PhysicalSize::new(600, 340),
            modes: Vec::new(),
            max_pixels: None,
            enabled: true,
        }
    }

    #[test]
    fn test_add_picks_smallest_free_serial() {
        let mut catalog = Catalog::in_memory(Vec::new(), HashSet::from([1]));
        catalog.add(new_display("Desk", Some(2))).unwrap();

        let added = catalog.add(new_display("Couch", None)).unwrap();
        assert_eq!(added.serial_num, 3);
        assert_eq!(added.modes, vec![DEFAULT_MODE]);
    }

    #[test]
    fn test_add_rejects_serial_of_online_display() {
        let mut catalog = Catalog::in_memory(Vec::new(), HashSet::from([4]));
        let result = catalog.add(new_display("Desk", Some(4)));
        assert!(matches!(result, Err(MirageError::FleetError(_))));
        assert!(catalog.configs().is_empty());
    }

    #[test]
    fn test_add_enforces_pixel_envelope() {
        let mut catalog = Catalog::in_memory(Vec::new(), HashSet::new());
        let mut display = new_display("Desk", None);
        display.modes = vec![DisplayMode::new(1920, 1080, 60.0, true)];
        display.max_pixels = Some(PixelSize::new(1920, 1080));
        assert!(catalog.add(display).is_err());
    }

    #[test]
    fn test_resolve_by_serial_and_name() {
        let mut catalog = Catalog::in_memory(Vec::new(), HashSet::new());
        catalog.add(new_display("Desk", Some(7))).unwrap();

        assert_eq!(catalog.resolve("7").unwrap(), 0);
        assert_eq!(catalog.resolve("desk").unwrap(), 0);
        assert!(catalog.resolve("Couch").is_err());
    }

    #[test]
    fn test_move_at_boundary_is_a_no_op() {
        let mut catalog = Catalog::in_memory(Vec::new(), HashSet::new());
        catalog.add(new_display("A", None)).unwrap();
        catalog.add(new_display("B", None)).unwrap();

        assert!(!catalog.move_display("A", MoveDirection::Up).unwrap());
        assert!(catalog.move_display("A", MoveDirection::Down).unwrap());
        assert_eq!(catalog.configs()[1].name, "A");
    }

    #[test]
    fn test_file_backed_catalog_persists_edits() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("displays.json");

        let mut catalog = Catalog::open(path.clone()).unwrap();
        catalog.add(new_display("Desk", Some(9))).unwrap();
        catalog.rename("9", "Studio").unwrap();

        let reloaded = FileConfigStore::new(path).load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].name, "Studio");
    }
}
