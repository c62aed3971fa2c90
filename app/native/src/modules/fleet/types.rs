//! Core data types for the virtual display fleet.
//!
//! These types form the persisted and runtime model of the fleet:
//! - `DisplayConfig` is the persisted description of one managed display
//! - `DisplayMode` / `PhysicalSize` / `PixelSize` describe its geometry
//! - `DisplayState` is the per-config lifecycle state
//! - `RuntimeInfo` is the read-only view of a running display
//! - `RestoreFailure` records a display the startup restore pass could not bring back

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a display configuration (UUID v7).
pub type ConfigId = Uuid;

/// Display identifier issued by the operating system.
pub type DisplayId = u32;

/// Per-config counter bumped every time a new runtime display is created.
pub type Generation = u64;

/// Mode used when a persisted config carries no modes at all.
pub const DEFAULT_MODE: DisplayMode = DisplayMode::new(1920, 1080, 60.0, false);

// ============================================================================
// Geometry Types
// ============================================================================

/// A single display mode offered by a managed display.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
    #[serde(default, rename = "hiDPI")]
    pub hi_dpi: bool,
}

impl DisplayMode {
    #[must_use]
    pub const fn new(width: u32, height: u32, refresh_rate: f64, hi_dpi: bool) -> Self {
        Self { width, height, refresh_rate, hi_dpi }
    }

    /// Backing-store pixels needed to present this mode.
    ///
    /// HiDPI modes render at twice the logical resolution in each dimension.
    #[must_use]
    pub const fn backing_pixels(&self) -> PixelSize {
        let scale = if self.hi_dpi { 2 } else { 1 };
        PixelSize::new(self.width.saturating_mul(scale), self.height.saturating_mul(scale))
    }

    /// Checks that the mode has a usable resolution and refresh rate.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.refresh_rate.is_finite() && self.refresh_rate > 0.0
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh_rate)?;
        if self.hi_dpi {
            write!(f, " (HiDPI)")?;
        }
        Ok(())
    }
}

/// A pixel extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self { Self { width, height } }

    /// Returns `true` if `self` fits inside `other` in both dimensions.
    #[must_use]
    pub const fn fits_within(&self, other: &Self) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

/// Physical size of a display in millimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalSize {
    pub width_mm: u32,
    pub height_mm: u32,
}

impl PhysicalSize {
    #[must_use]
    pub const fn new(width_mm: u32, height_mm: u32) -> Self { Self { width_mm, height_mm } }

    #[must_use]
    pub const fn is_valid(&self) -> bool { self.width_mm > 0 && self.height_mm > 0 }
}

// ============================================================================
// Display Config
// ============================================================================

/// Persisted configuration of one managed display.
///
/// The serial number doubles as the hardware serial the OS sees, so it must be
/// unique across every config and every managed display currently online.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    pub id: ConfigId,
    #[serde(default)]
    pub name: String,
    pub serial_num: u32,
    #[serde(default)]
    pub physical_width_mm: u32,
    #[serde(default)]
    pub physical_height_mm: u32,
    #[serde(default)]
    pub modes: Vec<DisplayMode>,
    #[serde(default)]
    pub desired_enabled: bool,
}

impl DisplayConfig {
    /// Creates a new, disabled config with a fresh id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        serial_num: u32,
        physical_size: PhysicalSize,
        modes: Vec<DisplayMode>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            serial_num,
            physical_width_mm: physical_size.width_mm,
            physical_height_mm: physical_size.height_mm,
            modes,
            desired_enabled: false,
        }
    }

    #[must_use]
    pub const fn physical_size(&self) -> PhysicalSize {
        PhysicalSize::new(self.physical_width_mm, self.physical_height_mm)
    }

    /// Largest backing-store extent across all modes.
    #[must_use]
    pub fn pixel_envelope(&self) -> PixelSize { pixel_envelope(&self.modes) }

    /// Whether the running display must be recreated to move from `self` to `next`.
    ///
    /// Name, serial and physical size are baked into the OS descriptor. Modes
    /// only force a rebuild when they need a larger backing store.
    #[must_use]
    pub fn requires_rebuild(&self, next: &Self) -> bool {
        if self.name != next.name
            || self.serial_num != next.serial_num
            || self.physical_size() != next.physical_size()
        {
            return true;
        }

        let current = self.pixel_envelope();
        let wanted = next.pixel_envelope();
        wanted.width > current.width || wanted.height > current.height
    }

    /// Default name for a display with the given serial.
    #[must_use]
    pub fn default_name(serial_num: u32) -> String { format!("Virtual Display {serial_num}") }
}

/// Largest backing-store extent across a mode list.
#[must_use]
pub fn pixel_envelope(modes: &[DisplayMode]) -> PixelSize {
    modes.iter().map(DisplayMode::backing_pixels).fold(PixelSize::default(), |acc, px| {
        PixelSize::new(acc.width.max(px.width), acc.height.max(px.height))
    })
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a managed display.
///
/// `Disabled → Enabling → Running → Disabling → Disabled`, and
/// `Running → Rebuilding → Running`. A destroyed config has no state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayState {
    #[default]
    Disabled,
    Enabling,
    Running,
    Disabling,
    Rebuilding,
}

impl DisplayState {
    /// States an interrupted operation can leave behind.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Enabling | Self::Rebuilding | Self::Disabling)
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disabled => "disabled",
            Self::Enabling => "enabling",
            Self::Running => "running",
            Self::Disabling => "disabling",
            Self::Rebuilding => "rebuilding",
        };
        f.write_str(label)
    }
}

/// Read-only view of a running display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub config_id: ConfigId,
    pub display_id: DisplayId,
    pub generation: Generation,
}

/// Direction for reordering configs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Identity fields of a config that can be edited in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub serial_num: Option<u32>,
    pub physical_size: Option<PhysicalSize>,
}

/// A display the startup restore pass could not bring back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreFailure {
    pub config_id: ConfigId,
    pub name: String,
    pub serial: u32,
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_modes(modes: Vec<DisplayMode>) -> DisplayConfig {
        DisplayConfig::new("Desk", 7, PhysicalSize::new(600, 340), modes)
    }

    #[test]
    fn test_hidpi_mode_doubles_backing_pixels() {
        let mode = DisplayMode::new(1440, 900, 60.0, true);
        assert_eq!(mode.backing_pixels(), PixelSize::new(2880, 1800));
    }

    #[test]
    fn test_pixel_envelope_takes_max_per_dimension() {
        let modes = [
            DisplayMode::new(3000, 1000, 60.0, false),
            DisplayMode::new(1280, 1600, 60.0, false),
        ];
        assert_eq!(pixel_envelope(&modes), PixelSize::new(3000, 1600));
    }

    #[test]
    fn test_shrinking_modes_does_not_require_rebuild() {
        let current = config_with_modes(vec![DisplayMode::new(2560, 1440, 60.0, false)]);
        let mut next = current.clone();
        next.modes = vec![DisplayMode::new(1920, 1080, 60.0, false)];
        assert!(!current.requires_rebuild(&next));
    }

    #[test]
    fn test_growing_envelope_requires_rebuild() {
        let current = config_with_modes(vec![DisplayMode::new(1920, 1080, 60.0, false)]);
        let mut next = current.clone();
        next.modes.push(DisplayMode::new(1920, 1080, 60.0, true));
        assert!(current.requires_rebuild(&next));
    }

    #[test]
    fn test_identity_changes_require_rebuild() {
        let current = config_with_modes(vec![DEFAULT_MODE]);

        let mut renamed = current.clone();
        renamed.name = "Other".to_string();
        assert!(current.requires_rebuild(&renamed));

        let mut reserialed = current.clone();
        reserialed.serial_num = 8;
        assert!(current.requires_rebuild(&reserialed));

        let mut resized = current.clone();
        resized.physical_width_mm = 700;
        assert!(current.requires_rebuild(&resized));

        let mut toggled = current.clone();
        toggled.desired_enabled = true;
        assert!(!current.requires_rebuild(&toggled));
    }

    #[test]
    fn test_config_serializes_camel_case() {
        let config = config_with_modes(vec![DisplayMode::new(1280, 720, 60.0, true)]);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["serialNum"], 7);
        assert_eq!(json["physicalWidthMm"], 600);
        assert_eq!(json["modes"][0]["hiDPI"], true);
        assert_eq!(json["desiredEnabled"], false);
    }

    #[test]
    fn test_transitional_states() {
        assert!(DisplayState::Enabling.is_transitional());
        assert!(DisplayState::Rebuilding.is_transitional());
        assert!(!DisplayState::Running.is_transitional());
        assert!(DisplayState::Disabling.is_transitional());
    }
}
