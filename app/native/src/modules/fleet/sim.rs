//! In-process display subsystem.
//!
//! `SimulatedOs` implements all three OS traits over a shared in-memory world.
//! It reproduces the misbehaviour the fleet has to cope with:
//!
//! - teardown that confirms late, only through one channel, or never
//! - creation failing while a display with the same serial is still online
//! - new displays collapsing into a mirror set (optionally without the root
//!   reporting its mirror flag) or stacking at identical bounds
//! - a main display that flips on every enumeration
//! - topology subscriptions that cannot be registered
//!
//! It also records every creation and committed transaction so tests can
//! assert on exactly what the fleet asked the OS to do.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::OsError;
use super::os::{
    DisplayBackend, DisplayDescriptor, DisplayEnumeration, DisplaySettings, ManagedIdentity, Platform,
    RawDisplay, RuntimeHandle, SubscriptionToken, TerminationCallback, TopologyCallback,
    TopologyInspector, TopologyRepairer, TopologyTransaction, VirtualDisplay,
};
use super::topology::Bounds;
use super::types::DisplayId;
use crate::config::types::fleet::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};

/// Vendor id given to simulated physical displays.
const PHYSICAL_VENDOR_ID: u32 = 0x05ac;

/// How a released display goes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeardownBehavior {
    /// Delay until the display leaves the topology; `None` keeps it online.
    pub offline_after: Option<Duration>,
    /// Delay until the termination callback fires; `None` never fires it.
    pub terminate_after: Option<Duration>,
}

impl TeardownBehavior {
    /// Termination first, then the display leaves the topology.
    #[must_use]
    pub const fn prompt() -> Self {
        Self {
            offline_after: Some(Duration::from_millis(15)),
            terminate_after: Some(Duration::from_millis(5)),
        }
    }

    /// Goes offline but never reports termination.
    #[must_use]
    pub const fn silent(offline_after: Duration) -> Self {
        Self { offline_after: Some(offline_after), terminate_after: None }
    }

    /// Reports termination but never leaves the topology.
    #[must_use]
    pub const fn stuck_online() -> Self {
        Self { offline_after: None, terminate_after: Some(Duration::from_millis(5)) }
    }
}

impl Default for TeardownBehavior {
    fn default() -> Self { Self::prompt() }
}

/// How newly created managed displays are arranged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MirrorMode {
    /// Extended desktop.
    #[default]
    Off,
    /// Mirrored onto the first managed display, which reports the mirror flag.
    Flagged,
    /// Mirrored, but the root does not report the mirror flag.
    OmitRootFlag,
}

/// One successful display creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreationRecord {
    pub display_id: DisplayId,
    pub serial: u32,
    pub name: String,
}

/// One step of a committed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStep {
    ClearMirror(DisplayId),
    SetOrigin { id: DisplayId, x: i32, y: i32 },
}

#[derive(Default)]
struct SimWorld {
    next_display_id: DisplayId,
    next_token: u64,
    displays: Vec<RawDisplay>,
    main: Option<DisplayId>,
    callbacks: HashMap<DisplayId, TerminationCallback>,
    subscribers: HashMap<u64, TopologyCallback>,

    teardown: HashMap<u32, TeardownBehavior>,
    creation_failures: HashMap<u32, u32>,
    mirror_mode: MirrorMode,
    stack_new_displays: bool,
    reject_transactions: bool,
    reject_settings: bool,
    fail_subscribe: bool,
    oscillate_main: bool,
    enumerations: u64,

    creation_attempts: usize,
    creations: Vec<CreationRecord>,
    transactions: Vec<Vec<TransactionStep>>,
    cancelled_transactions: usize,
}

impl SimWorld {
    fn allocate_id(&mut self) -> DisplayId {
        self.next_display_id += 1;
        self.next_display_id
    }

    fn right_edge(&self) -> i32 {
        self.displays
            .iter()
            .map(|d| d.bounds.x.saturating_add_unsigned(d.bounds.width))
            .max()
            .unwrap_or(0)
    }

    fn add(&mut self, display: RawDisplay) {
        if self.main.is_none() {
            self.main = Some(display.id);
        }
        self.displays.push(display);
    }

    fn remove(&mut self, id: DisplayId) -> bool {
        let before = self.displays.len();
        self.displays.retain(|d| d.id != id);
        if self.displays.len() == before {
            return false;
        }
        if self.main == Some(id) {
            self.main = self
                .displays
                .iter()
                .find(|d| d.bounds.origin() == (0, 0))
                .or_else(|| self.displays.first())
                .map(|d| d.id);
        }
        self.normalize_mirrors();
        true
    }

    /// Drops mirror links to displays that are gone and root flags without mirrors.
    fn normalize_mirrors(&mut self) {
        let online: Vec<DisplayId> = self.displays.iter().map(|d| d.id).collect();
        for display in &mut self.displays {
            if display.mirror_master_id.is_some_and(|m| !online.contains(&m)) {
                display.mirror_master_id = None;
                display.is_mirror = false;
            }
        }
        let masters: Vec<DisplayId> = self.displays.iter().filter_map(|d| d.mirror_master_id).collect();
        for display in &mut self.displays {
            if display.mirror_master_id.is_none() && !masters.contains(&display.id) {
                display.is_mirror = false;
            }
        }
    }

    fn teardown_for(&self, serial: u32) -> TeardownBehavior {
        self.teardown.get(&serial).copied().unwrap_or_default()
    }

    fn subscribers(&self) -> Vec<TopologyCallback> { self.subscribers.values().cloned().collect() }
}

/// Simulated display subsystem. Cheap to clone; clones share one world.
#[derive(Clone)]
pub struct SimulatedOs {
    identity: ManagedIdentity,
    world: Arc<Mutex<SimWorld>>,
}

impl Default for SimulatedOs {
    fn default() -> Self {
        Self::new(ManagedIdentity { vendor_id: DEFAULT_VENDOR_ID, product_id: DEFAULT_PRODUCT_ID })
    }
}

impl fmt::Debug for SimulatedOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedOs").field("identity", &self.identity).finish_non_exhaustive()
    }
}

impl SimulatedOs {
    #[must_use]
    pub fn new(identity: ManagedIdentity) -> Self {
        Self {
            identity,
            world: Arc::new(Mutex::new(SimWorld::default())),
        }
    }

    /// Bundles this simulator as every OS capability.
    #[must_use]
    pub fn platform(&self) -> Platform {
        Platform {
            backend: Arc::new(self.clone()),
            inspector: Arc::new(self.clone()),
            repairer: Arc::new(self.clone()),
        }
    }

    /// Runs `mutate` on the world and notifies subscribers afterwards.
    fn change<T>(&self, mutate: impl FnOnce(&mut SimWorld) -> T) -> T {
        let (result, subscribers) = {
            let mut world = self.world.lock();
            let result = mutate(&mut world);
            (result, world.subscribers())
        };
        for notify in subscribers {
            notify();
        }
        result
    }

    // ========================================================================
    // Scenario setup
    // ========================================================================

    /// Plugs in a display not managed by the fleet.
    pub fn add_physical_display(&self, width: u32, height: u32) -> DisplayId {
        self.change(|world| {
            let id = world.allocate_id();
            let x = world.right_edge();
            world.add(RawDisplay {
                id,
                vendor_id: PHYSICAL_VENDOR_ID,
                product_id: 1,
                serial: 0,
                is_active: true,
                is_mirror: false,
                mirror_master_id: None,
                bounds: Bounds::new(x, 0, width, height),
            });
            id
        })
    }

    /// Adds a managed-looking display the fleet did not create.
    pub fn add_foreign_managed_display(&self, serial: u32) -> DisplayId {
        let identity = self.identity;
        self.change(|world| {
            let id = world.allocate_id();
            let x = world.right_edge();
            world.add(RawDisplay {
                id,
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
                serial,
                is_active: true,
                is_mirror: false,
                mirror_master_id: None,
                bounds: Bounds::new(x, 0, 1920, 1080),
            });
            id
        })
    }

    pub fn set_main(&self, main: Option<DisplayId>) { self.change(|world| world.main = main); }

    pub fn set_teardown_behavior(&self, serial: u32, behavior: TeardownBehavior) {
        self.world.lock().teardown.insert(serial, behavior);
    }

    /// Makes the next `count` creations of `serial` fail.
    pub fn fail_creations_for_serial(&self, serial: u32, count: u32) {
        self.world.lock().creation_failures.insert(serial, count);
    }

    pub fn set_mirror_new_displays(&self, mode: MirrorMode) { self.world.lock().mirror_mode = mode; }

    pub fn set_stack_new_displays(&self, stack: bool) { self.world.lock().stack_new_displays = stack; }

    pub fn set_reject_transactions(&self, reject: bool) { self.world.lock().reject_transactions = reject; }

    pub fn set_reject_settings(&self, reject: bool) { self.world.lock().reject_settings = reject; }

    pub fn set_fail_subscribe(&self, fail: bool) { self.world.lock().fail_subscribe = fail; }

    /// Reports no main display on every other enumeration.
    pub fn set_oscillate_main(&self, oscillate: bool) { self.world.lock().oscillate_main = oscillate; }

    /// Kills the managed display with `serial` as if the system tore it down.
    ///
    /// Returns `false` if no such display is online.
    pub fn terminate_display(&self, serial: u32) -> bool {
        let identity = self.identity;
        let callback = self.change(|world| {
            let id = world
                .displays
                .iter()
                .find(|d| identity.matches(d) && d.serial == serial)
                .map(|d| d.id)?;
            world.remove(id);
            Some(world.callbacks.remove(&id))
        });

        match callback {
            Some(Some(on_terminate)) => {
                on_terminate();
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn creations(&self) -> Vec<CreationRecord> { self.world.lock().creations.clone() }

    /// Every call to `create_display`, including rejected ones.
    #[must_use]
    pub fn creation_attempts(&self) -> usize { self.world.lock().creation_attempts }

    #[must_use]
    pub fn transactions(&self) -> Vec<Vec<TransactionStep>> { self.world.lock().transactions.clone() }

    #[must_use]
    pub fn cancelled_transactions(&self) -> usize { self.world.lock().cancelled_transactions }

    #[must_use]
    pub fn online_displays(&self) -> Vec<RawDisplay> { self.world.lock().displays.clone() }

    #[must_use]
    pub fn main_display(&self) -> Option<DisplayId> { self.world.lock().main }

    /// Serials of online managed displays, sorted.
    #[must_use]
    pub fn online_managed_serials(&self) -> Vec<u32> {
        let mut serials: Vec<u32> = self
            .world
            .lock()
            .displays
            .iter()
            .filter(|d| self.identity.matches(d))
            .map(|d| d.serial)
            .collect();
        serials.sort_unstable();
        serials
    }

    #[must_use]
    pub fn display_for_serial(&self, serial: u32) -> Option<RawDisplay> {
        self.world
            .lock()
            .displays
            .iter()
            .find(|d| self.identity.matches(d) && d.serial == serial)
            .cloned()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn remove_display(&self, id: DisplayId) {
        let subscribers = {
            let mut world = self.world.lock();
            if !world.remove(id) {
                return;
            }
            world.subscribers()
        };
        for notify in subscribers {
            notify();
        }
    }

    /// Starts tearing down a released display according to its behaviour.
    fn release(&self, id: DisplayId, serial: u32) {
        let (behavior, callback) = {
            let mut world = self.world.lock();
            (world.teardown_for(serial), world.callbacks.remove(&id))
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                if let Some(delay) = behavior.offline_after {
                    let os = self.clone();
                    runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        os.remove_display(id);
                    });
                }
                if let (Some(delay), Some(on_terminate)) = (behavior.terminate_after, callback) {
                    runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        on_terminate();
                    });
                }
            }
            Err(_) => {
                if behavior.offline_after.is_some() {
                    self.remove_display(id);
                }
                if let (Some(_), Some(on_terminate)) = (behavior.terminate_after, callback) {
                    on_terminate();
                }
            }
        }
    }
}

// ============================================================================
// OS contract
// ============================================================================

/// Handle to a simulated display. Dropping it starts the teardown.
struct SimDisplayHandle {
    os: SimulatedOs,
    display_id: DisplayId,
    serial: u32,
}

impl fmt::Debug for SimDisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDisplayHandle")
            .field("display_id", &self.display_id)
            .field("serial", &self.serial)
            .finish()
    }
}

impl VirtualDisplay for SimDisplayHandle {
    fn display_id(&self) -> DisplayId { self.display_id }
}

impl Drop for SimDisplayHandle {
    fn drop(&mut self) { self.os.release(self.display_id, self.serial); }
}

impl DisplayBackend for SimulatedOs {
    fn create_display(
        &self,
        descriptor: &DisplayDescriptor,
        on_terminate: TerminationCallback,
    ) -> Result<RuntimeHandle, OsError> {
        let identity = self.identity;
        let created = self.change(|world| {
            world.creation_attempts += 1;

            if let Some(remaining) = world.creation_failures.get_mut(&descriptor.serial)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(OsError::Create(format!("scripted failure for serial {}", descriptor.serial)));
            }
            if world.displays.iter().any(|d| identity.matches(d) && d.serial == descriptor.serial) {
                return Err(OsError::Create(format!("serial {} is still online", descriptor.serial)));
            }

            let id = world.allocate_id();
            let (width, height) = match (descriptor.max_pixels.width, descriptor.max_pixels.height) {
                (0, _) | (_, 0) => (1920, 1080),
                (w, h) => (w, h),
            };
            let root = world
                .displays
                .iter()
                .find(|d| identity.matches(d) && d.mirror_master_id.is_none())
                .map(|d| (d.id, d.bounds));

            let mut display = RawDisplay {
                id,
                vendor_id: descriptor.vendor_id,
                product_id: descriptor.product_id,
                serial: descriptor.serial,
                is_active: true,
                is_mirror: false,
                mirror_master_id: None,
                bounds: Bounds::new(world.right_edge(), 0, width, height),
            };

            match (world.mirror_mode, root) {
                (MirrorMode::Off, Some((_, root_bounds))) if world.stack_new_displays => {
                    display.bounds = Bounds::new(root_bounds.x, root_bounds.y, width, height);
                }
                (MirrorMode::Flagged | MirrorMode::OmitRootFlag, Some((root_id, root_bounds))) => {
                    display.is_mirror = true;
                    display.mirror_master_id = Some(root_id);
                    display.bounds = root_bounds;
                    let flag_root = world.mirror_mode == MirrorMode::Flagged;
                    if let Some(root) = world.displays.iter_mut().find(|d| d.id == root_id) {
                        root.is_mirror = flag_root;
                    }
                }
                _ => {}
            }

            world.add(display);
            world.callbacks.insert(id, on_terminate);
            world.creations.push(CreationRecord {
                display_id: id,
                serial: descriptor.serial,
                name: descriptor.name.clone(),
            });
            Ok(id)
        })?;

        Ok(Box::new(SimDisplayHandle {
            os: self.clone(),
            display_id: created,
            serial: descriptor.serial,
        }))
    }

    fn apply_settings(&self, _handle: &dyn VirtualDisplay, settings: &DisplaySettings) -> bool {
        !settings.modes.is_empty() && !self.world.lock().reject_settings
    }
}

impl TopologyInspector for SimulatedOs {
    fn enumerate_online_displays(&self) -> Result<DisplayEnumeration, OsError> {
        let mut world = self.world.lock();
        world.enumerations += 1;
        let main = if world.oscillate_main && world.enumerations % 2 == 1 { None } else { world.main };
        Ok(DisplayEnumeration {
            displays: world.displays.clone(),
            main_display_id: main,
        })
    }

    fn subscribe(&self, on_change: TopologyCallback) -> Result<SubscriptionToken, OsError> {
        let mut world = self.world.lock();
        if world.fail_subscribe {
            return Err(OsError::Subscribe("reconfiguration callback rejected".to_string()));
        }
        world.next_token += 1;
        let token = world.next_token;
        world.subscribers.insert(token, on_change);
        Ok(SubscriptionToken(token))
    }

    fn unsubscribe(&self, token: SubscriptionToken) { self.world.lock().subscribers.remove(&token.0); }
}

struct SimTransaction<'a> {
    os: &'a SimulatedOs,
    steps: Vec<TransactionStep>,
}

impl SimTransaction<'_> {
    fn ensure_online(&self, id: DisplayId) -> Result<(), OsError> {
        if self.os.world.lock().displays.iter().any(|d| d.id == id) {
            Ok(())
        } else {
            Err(OsError::Transaction(format!("display {id} is offline")))
        }
    }
}

impl TopologyTransaction for SimTransaction<'_> {
    fn clear_mirror(&mut self, id: DisplayId) -> Result<(), OsError> {
        self.ensure_online(id)?;
        self.steps.push(TransactionStep::ClearMirror(id));
        Ok(())
    }

    fn set_origin(&mut self, id: DisplayId, x: i32, y: i32) -> Result<(), OsError> {
        self.ensure_online(id)?;
        self.steps.push(TransactionStep::SetOrigin { id, x, y });
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), OsError> {
        let steps = self.steps;
        self.os.change(|world| {
            let mut new_main = None;
            for step in &steps {
                match *step {
                    TransactionStep::ClearMirror(id) => {
                        if let Some(display) = world.displays.iter_mut().find(|d| d.id == id) {
                            display.is_mirror = false;
                            display.mirror_master_id = None;
                        }
                    }
                    TransactionStep::SetOrigin { id, x, y } => {
                        if let Some(display) = world.displays.iter_mut().find(|d| d.id == id) {
                            display.bounds.x = x;
                            display.bounds.y = y;
                        }
                        if (x, y) == (0, 0) {
                            new_main = Some(id);
                        }
                    }
                }
            }
            world.normalize_mirrors();
            if new_main.is_some() {
                world.main = new_main;
            }
            world.transactions.push(steps);
        });
        Ok(())
    }

    fn cancel(self: Box<Self>) { self.os.world.lock().cancelled_transactions += 1; }
}

impl TopologyRepairer for SimulatedOs {
    fn begin_transaction(&self) -> Result<Box<dyn TopologyTransaction + '_>, OsError> {
        if self.world.lock().reject_transactions {
            return Err(OsError::Transaction("configuration is locked".to_string()));
        }
        Ok(Box::new(SimTransaction { os: self, steps: Vec::new() }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fleet::types::{PhysicalSize, PixelSize};

    fn descriptor(os: &SimulatedOs, serial: u32) -> DisplayDescriptor {
        DisplayDescriptor {
            name: format!("Sim {serial}"),
            max_pixels: PixelSize::new(1920, 1080),
            physical_size: PhysicalSize::new(600, 340),
            vendor_id: os.identity.vendor_id,
            product_id: os.identity.product_id,
            serial,
        }
    }

    #[test]
    fn test_creation_fails_while_serial_online() {
        let os = SimulatedOs::default();
        let _first = os.create_display(&descriptor(&os, 1), Box::new(|| {})).unwrap();
        let second = os.create_display(&descriptor(&os, 1), Box::new(|| {}));
        assert!(matches!(second, Err(OsError::Create(_))));
        assert_eq!(os.creation_attempts(), 2);
    }

    #[test]
    fn test_drop_without_runtime_tears_down_synchronously() {
        let os = SimulatedOs::default();
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        let handle = os
            .create_display(&descriptor(&os, 3), Box::new(move || *flag.lock() = true))
            .unwrap();

        drop(handle);
        assert!(os.online_managed_serials().is_empty());
        assert!(*fired.lock());
    }

    #[test]
    fn test_omitted_root_flag_mirrors_without_flagging_root() {
        let os = SimulatedOs::default();
        os.set_mirror_new_displays(MirrorMode::OmitRootFlag);
        let a = os.create_display(&descriptor(&os, 1), Box::new(|| {})).unwrap();
        let b = os.create_display(&descriptor(&os, 2), Box::new(|| {})).unwrap();

        let displays = os.online_displays();
        let root = displays.iter().find(|d| d.id == a.display_id()).unwrap();
        let mirror = displays.iter().find(|d| d.id == b.display_id()).unwrap();
        assert!(!root.is_mirror);
        assert_eq!(mirror.mirror_master_id, Some(root.id));
        assert_eq!(mirror.bounds, root.bounds);
    }

    #[test]
    fn test_commit_moves_main_to_origin() {
        let os = SimulatedOs::default();
        let physical = os.add_physical_display(2560, 1440);
        let handle = os.create_display(&descriptor(&os, 1), Box::new(|| {})).unwrap();
        assert_eq!(os.main_display(), Some(physical));

        let mut transaction = os.begin_transaction().unwrap();
        transaction.set_origin(handle.display_id(), 0, 0).unwrap();
        transaction.commit().unwrap();

        assert_eq!(os.main_display(), Some(handle.display_id()));
        assert_eq!(os.transactions().len(), 1);
    }

    #[test]
    fn test_offline_display_rejects_transaction_steps() {
        let os = SimulatedOs::default();
        let mut transaction = os.begin_transaction().unwrap();
        assert!(transaction.clear_mirror(42).is_err());
        transaction.cancel();
        assert_eq!(os.cancelled_transactions(), 1);
    }

    #[test]
    fn test_subscription_failure_is_reported() {
        let os = SimulatedOs::default();
        os.set_fail_subscribe(true);
        assert!(matches!(os.subscribe(Arc::new(|| {})), Err(OsError::Subscribe(_))));
    }
}
