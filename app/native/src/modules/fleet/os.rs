//! Contract between the fleet and the host display subsystem.
//!
//! The fleet never talks to the OS directly. Platform implementations provide:
//! - [`DisplayBackend`] to create managed displays and push settings to them
//! - [`TopologyInspector`] to enumerate online displays and observe changes
//! - [`TopologyRepairer`] to apply all-or-nothing reconfiguration transactions
//!
//! Callbacks handed to the platform may run on any thread. They must only send
//! an [`OsEvent`] into the fleet's channel; all state changes happen on the
//! fleet's executor.

use std::fmt;
use std::sync::Arc;

use super::error::OsError;
use super::topology::Bounds;
use super::types::{ConfigId, DisplayId, DisplayMode, Generation, PhysicalSize, PixelSize};

/// Fired at most once, when the OS reports a managed display has terminated.
pub type TerminationCallback = Box<dyn FnOnce() + Send + 'static>;

/// Fired whenever the OS display configuration changes.
pub type TopologyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Token returned by [`TopologyInspector::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Everything the OS needs to create a managed display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayDescriptor {
    pub name: String,
    pub max_pixels: PixelSize,
    pub physical_size: PhysicalSize,
    pub vendor_id: u32,
    pub product_id: u32,
    pub serial: u32,
}

/// Settings pushed to a live display.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplaySettings {
    pub hi_dpi: bool,
    pub modes: Vec<DisplayMode>,
}

impl DisplaySettings {
    /// HiDPI is enabled when any mode asks for it.
    #[must_use]
    pub fn from_modes(modes: &[DisplayMode]) -> Self {
        Self {
            hi_dpi: modes.iter().any(|m| m.hi_dpi),
            modes: modes.to_vec(),
        }
    }
}

/// A live managed display. Dropping it asks the OS to tear the display down.
pub trait VirtualDisplay: Send + Sync + fmt::Debug {
    /// OS-assigned display id.
    fn display_id(&self) -> DisplayId;
}

/// Exclusively owned handle to a running display.
pub type RuntimeHandle = Box<dyn VirtualDisplay>;

/// Creates managed displays.
pub trait DisplayBackend: Send + Sync {
    /// Creates a display. `on_terminate` fires once the OS has fully torn it down.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Create`] if the OS rejects the descriptor. This
    /// happens transiently right after a teardown of the same serial.
    fn create_display(
        &self,
        descriptor: &DisplayDescriptor,
        on_terminate: TerminationCallback,
    ) -> Result<RuntimeHandle, OsError>;

    /// Applies modes to a live display. Returns `false` if the OS rejected them.
    fn apply_settings(&self, handle: &dyn VirtualDisplay, settings: &DisplaySettings) -> bool;
}

/// One online display as the OS enumerates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDisplay {
    pub id: DisplayId,
    pub vendor_id: u32,
    pub product_id: u32,
    pub serial: u32,
    pub is_active: bool,
    pub is_mirror: bool,
    pub mirror_master_id: Option<DisplayId>,
    pub bounds: Bounds,
}

/// Result of enumerating online displays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayEnumeration {
    pub displays: Vec<RawDisplay>,
    pub main_display_id: Option<DisplayId>,
}

/// Read access to the OS display topology.
pub trait TopologyInspector: Send + Sync {
    /// Enumerates every online display.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Enumerate`] if the OS query fails.
    fn enumerate_online_displays(&self) -> Result<DisplayEnumeration, OsError>;

    /// Registers a topology-change callback. Best effort.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Subscribe`] if registration fails; callers fall back
    /// to polling.
    fn subscribe(&self, on_change: TopologyCallback) -> Result<SubscriptionToken, OsError>;

    /// Removes a callback registered with [`Self::subscribe`].
    fn unsubscribe(&self, token: SubscriptionToken);
}

/// An open reconfiguration transaction. Nothing is applied until [`commit`](Self::commit).
pub trait TopologyTransaction {
    /// Removes the display from any mirror set.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Transaction`] if the step is rejected.
    fn clear_mirror(&mut self, id: DisplayId) -> Result<(), OsError>;

    /// Moves the display's origin in global coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Transaction`] if the step is rejected.
    fn set_origin(&mut self, id: DisplayId, x: i32, y: i32) -> Result<(), OsError>;

    /// Applies every queued step atomically.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Transaction`] if the OS refuses the configuration.
    fn commit(self: Box<Self>) -> Result<(), OsError>;

    /// Discards every queued step.
    fn cancel(self: Box<Self>);
}

/// Write access to the OS display topology.
pub trait TopologyRepairer: Send + Sync {
    /// Opens a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`OsError::Transaction`] if the OS cannot start one.
    fn begin_transaction(&self) -> Result<Box<dyn TopologyTransaction + '_>, OsError>;
}

/// The three OS capabilities the fleet depends on.
#[derive(Clone)]
pub struct Platform {
    pub backend: Arc<dyn DisplayBackend>,
    pub inspector: Arc<dyn TopologyInspector>,
    pub repairer: Arc<dyn TopologyRepairer>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("Platform").finish_non_exhaustive() }
}

/// Vendor/product pair that marks a display as managed by this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub vendor_id: u32,
    pub product_id: u32,
}

impl ManagedIdentity {
    #[must_use]
    pub const fn matches(&self, display: &RawDisplay) -> bool {
        display.vendor_id == self.vendor_id && display.product_id == self.product_id
    }
}

/// A termination reported by the OS for one generation of a config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Termination {
    pub config_id: ConfigId,
    pub generation: Generation,
}

/// Events redelivered from OS callback threads onto the fleet's executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsEvent {
    Terminated(Termination),
    TopologyChanged,
}
