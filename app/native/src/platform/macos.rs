//! CoreGraphics implementation of topology inspection and repair.
//!
//! Reconfiguration callbacks arrive on arbitrary threads. Each registration
//! owns a boxed [`TopologyCallback`] whose address is handed to CoreGraphics as
//! `user_info`; it is freed again on unsubscribe.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use core_graphics::display::{CGDirectDisplayID, CGDisplay};
use parking_lot::Mutex;

use crate::modules::fleet::error::OsError;
use crate::modules::fleet::os::{
    DisplayEnumeration, RawDisplay, SubscriptionToken, TopologyCallback, TopologyInspector,
    TopologyRepairer, TopologyTransaction,
};
use crate::modules::fleet::topology::Bounds;
use crate::modules::fleet::types::DisplayId;

/// Upper bound of displays queried in one enumeration.
const MAX_DISPLAYS: u32 = 32;

/// Apply a configuration for the current session only.
const CONFIGURE_FOR_SESSION: u32 = 1;

/// Passed as the master to leave a mirror set.
const NULL_DISPLAY: CGDirectDisplayID = 0;

/// Reconfiguration flag sent before a change is applied.
const BEGIN_CONFIGURATION_FLAG: u32 = 1 << 0;

type CGDisplayConfigRef = *mut c_void;
type ReconfigurationCallback = unsafe extern "C" fn(u32, u32, *mut c_void);

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGGetOnlineDisplayList(max: u32, displays: *mut CGDirectDisplayID, count: *mut u32) -> i32;
    fn CGBeginDisplayConfiguration(config: *mut CGDisplayConfigRef) -> i32;
    fn CGConfigureDisplayOrigin(config: CGDisplayConfigRef, display: CGDirectDisplayID, x: i32, y: i32) -> i32;
    fn CGConfigureDisplayMirrorOfDisplay(
        config: CGDisplayConfigRef,
        display: CGDirectDisplayID,
        master: CGDirectDisplayID,
    ) -> i32;
    fn CGCompleteDisplayConfiguration(config: CGDisplayConfigRef, option: u32) -> i32;
    fn CGCancelDisplayConfiguration(config: CGDisplayConfigRef) -> i32;
    fn CGDisplayRegisterReconfigurationCallback(callback: ReconfigurationCallback, user_info: *mut c_void) -> i32;
    fn CGDisplayRemoveReconfigurationCallback(callback: ReconfigurationCallback, user_info: *mut c_void) -> i32;
}

unsafe extern "C" fn on_reconfiguration(_display: u32, flags: u32, user_info: *mut c_void) {
    if flags & BEGIN_CONFIGURATION_FLAG != 0 || user_info.is_null() {
        return;
    }
    // SAFETY: `user_info` is the `Box<TopologyCallback>` leaked in `subscribe`;
    // it stays alive until the callback is removed in `unsubscribe`.
    let callback = unsafe { &*user_info.cast::<TopologyCallback>() };
    callback();
}

fn raw_display(id: CGDirectDisplayID) -> RawDisplay {
    let display = CGDisplay::new(id);
    let rect = display.bounds();
    let master = display.mirrors_display();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bounds = Bounds::new(
        rect.origin.x.round() as i32,
        rect.origin.y.round() as i32,
        rect.size.width.round() as u32,
        rect.size.height.round() as u32,
    );

    RawDisplay {
        id,
        vendor_id: display.vendor_number(),
        product_id: display.model_number(),
        serial: display.serial_number(),
        is_active: display.is_active(),
        is_mirror: display.is_in_mirror_set(),
        mirror_master_id: (master != NULL_DISPLAY).then_some(master),
        bounds,
    }
}

/// Topology access through CoreGraphics.
#[derive(Default)]
pub struct CoreGraphicsTopology {
    next_token: AtomicU64,
    /// Leaked callback boxes by token, stored as addresses.
    registrations: Mutex<HashMap<u64, usize>>,
}

impl CoreGraphicsTopology {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

impl TopologyInspector for CoreGraphicsTopology {
    fn enumerate_online_displays(&self) -> Result<DisplayEnumeration, OsError> {
        let mut ids = [0 as CGDirectDisplayID; MAX_DISPLAYS as usize];
        let mut count = 0_u32;
        // SAFETY: `ids` holds `MAX_DISPLAYS` entries.
        let status = unsafe { CGGetOnlineDisplayList(MAX_DISPLAYS, ids.as_mut_ptr(), &raw mut count) };
        if status != 0 {
            return Err(OsError::Enumerate(status));
        }

        let displays = ids.iter().take(count as usize).map(|id| raw_display(*id)).collect();
        let main = CGDisplay::main().id;
        Ok(DisplayEnumeration {
            displays,
            main_display_id: (main != NULL_DISPLAY).then_some(main),
        })
    }

    fn subscribe(&self, on_change: TopologyCallback) -> Result<SubscriptionToken, OsError> {
        let user_info = Box::into_raw(Box::new(on_change));
        // SAFETY: `user_info` stays valid until `unsubscribe` reclaims it.
        let status = unsafe { CGDisplayRegisterReconfigurationCallback(on_reconfiguration, user_info.cast()) };
        if status != 0 {
            // SAFETY: registration failed, so CoreGraphics holds no reference.
            drop(unsafe { Box::from_raw(user_info) });
            return Err(OsError::Subscribe(format!("CGDisplayRegisterReconfigurationCallback returned {status}")));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.registrations.lock().insert(token, user_info as usize);
        tracing::debug!(token, "registered display reconfiguration callback");
        Ok(SubscriptionToken(token))
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        let Some(address) = self.registrations.lock().remove(&token.0) else {
            return;
        };
        let user_info = address as *mut TopologyCallback;
        // SAFETY: `user_info` came from `Box::into_raw` in `subscribe` and is
        // reclaimed exactly once, after CoreGraphics stops calling it.
        unsafe {
            CGDisplayRemoveReconfigurationCallback(on_reconfiguration, user_info.cast());
            drop(Box::from_raw(user_info));
        }
    }
}

impl Drop for CoreGraphicsTopology {
    fn drop(&mut self) {
        let tokens: Vec<u64> = self.registrations.lock().keys().copied().collect();
        for token in tokens {
            self.unsubscribe(SubscriptionToken(token));
        }
    }
}

/// An open `CGDisplayConfigRef`.
struct CoreGraphicsTransaction {
    config: CGDisplayConfigRef,
}

fn check(status: i32, step: &str) -> Result<(), OsError> {
    if status == 0 { Ok(()) } else { Err(OsError::Transaction(format!("{step} returned {status}"))) }
}

impl TopologyTransaction for CoreGraphicsTransaction {
    fn clear_mirror(&mut self, id: DisplayId) -> Result<(), OsError> {
        // SAFETY: `config` is open until commit or cancel consumes `self`.
        check(unsafe { CGConfigureDisplayMirrorOfDisplay(self.config, id, NULL_DISPLAY) }, "clear mirror")
    }

    fn set_origin(&mut self, id: DisplayId, x: i32, y: i32) -> Result<(), OsError> {
        // SAFETY: `config` is open until commit or cancel consumes `self`.
        check(unsafe { CGConfigureDisplayOrigin(self.config, id, x, y) }, "set origin")
    }

    fn commit(self: Box<Self>) -> Result<(), OsError> {
        // SAFETY: completing the configuration releases `config`.
        check(unsafe { CGCompleteDisplayConfiguration(self.config, CONFIGURE_FOR_SESSION) }, "commit")
    }

    fn cancel(self: Box<Self>) {
        // SAFETY: cancelling the configuration releases `config`.
        let status = unsafe { CGCancelDisplayConfiguration(self.config) };
        if status != 0 {
            tracing::warn!(status, "failed to cancel display configuration");
        }
    }
}

impl TopologyRepairer for CoreGraphicsTopology {
    fn begin_transaction(&self) -> Result<Box<dyn TopologyTransaction + '_>, OsError> {
        let mut config: CGDisplayConfigRef = std::ptr::null_mut();
        // SAFETY: `config` is a valid out-pointer.
        check(unsafe { CGBeginDisplayConfiguration(&raw mut config) }, "begin configuration")?;
        Ok(Box::new(CoreGraphicsTransaction { config }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_includes_main_display() {
        let topology = CoreGraphicsTopology::new();
        let enumeration = topology.enumerate_online_displays().unwrap();
        if let Some(main) = enumeration.main_display_id {
            assert!(enumeration.displays.iter().any(|d| d.id == main));
        }
    }
}
