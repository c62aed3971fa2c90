//! Topology snapshots and the algorithms that keep them healthy.
//!
//! - [`health`] - pure evaluation of a snapshot and anchor selection
//! - [`repair`] - the all-or-nothing reconfiguration transaction
//! - [`stability`] - sampling until the OS stops changing the topology

pub mod health;
pub mod repair;
pub mod stability;

use serde::Serialize;

use super::os::{DisplayEnumeration, ManagedIdentity};
use super::types::DisplayId;

/// A display rectangle in global coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Origin as a sortable `(x, y)` pair.
    #[must_use]
    pub const fn origin(&self) -> (i32, i32) { (self.x, self.y) }
}

/// One online display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineDisplay {
    pub id: DisplayId,
    pub serial_number: u32,
    pub is_managed: bool,
    pub is_active: bool,
    pub is_in_mirror_set: bool,
    pub mirror_master_id: Option<DisplayId>,
    pub bounds: Bounds,
}

impl OnlineDisplay {
    /// Whether the OS reports any mirroring relationship for this display.
    #[must_use]
    pub const fn has_mirror_flags(&self) -> bool {
        self.is_in_mirror_set || self.mirror_master_id.is_some()
    }
}

/// Structurally comparable view of every online display plus the main display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    /// Online displays sorted by id.
    pub displays: Vec<OnlineDisplay>,
    pub main_display_id: Option<DisplayId>,
}

impl TopologySnapshot {
    /// Builds a snapshot from an OS enumeration.
    ///
    /// Displays are sorted by id so two enumerations of the same topology
    /// compare equal regardless of OS ordering.
    #[must_use]
    pub fn from_enumeration(enumeration: DisplayEnumeration, identity: ManagedIdentity) -> Self {
        let mut displays: Vec<OnlineDisplay> = enumeration
            .displays
            .into_iter()
            .map(|raw| OnlineDisplay {
                id: raw.id,
                serial_number: raw.serial,
                is_managed: identity.matches(&raw),
                is_active: raw.is_active,
                is_in_mirror_set: raw.is_mirror,
                mirror_master_id: raw.mirror_master_id.filter(|master| *master != raw.id),
                bounds: raw.bounds,
            })
            .collect();
        displays.sort_by_key(|d| d.id);

        Self {
            displays,
            main_display_id: enumeration.main_display_id,
        }
    }

    #[must_use]
    pub fn display(&self, id: DisplayId) -> Option<&OnlineDisplay> {
        self.displays.iter().find(|d| d.id == id)
    }

    /// Managed displays currently online.
    pub fn managed(&self) -> impl Iterator<Item = &OnlineDisplay> {
        self.displays.iter().filter(|d| d.is_managed)
    }

    /// Online managed display carrying this serial, if any.
    #[must_use]
    pub fn managed_with_serial(&self, serial: u32) -> Option<&OnlineDisplay> {
        self.managed().find(|d| d.serial_number == serial)
    }

    /// Whether any display not created by this process is online.
    #[must_use]
    pub fn has_physical_display(&self) -> bool { self.displays.iter().any(|d| !d.is_managed) }

    #[must_use]
    pub fn is_main(&self, id: DisplayId) -> bool { self.main_display_id == Some(id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fleet::os::RawDisplay;

    const IDENTITY: ManagedIdentity = ManagedIdentity { vendor_id: 0x1234, product_id: 0x5678 };

    fn raw(id: DisplayId, vendor_id: u32, serial: u32) -> RawDisplay {
        RawDisplay {
            id,
            vendor_id,
            product_id: 0x5678,
            serial,
            is_active: true,
            is_mirror: false,
            mirror_master_id: None,
            bounds: Bounds::new(0, 0, 1920, 1080),
        }
    }

    #[test]
    fn test_snapshot_sorts_and_classifies_displays() {
        let enumeration = DisplayEnumeration {
            displays: vec![raw(9, 0x1234, 2), raw(3, 0x05ac, 0), raw(5, 0x1234, 1)],
            main_display_id: Some(3),
        };

        let snapshot = TopologySnapshot::from_enumeration(enumeration, IDENTITY);
        let ids: Vec<_> = snapshot.displays.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
        assert!(snapshot.has_physical_display());
        assert_eq!(snapshot.managed().count(), 2);
        assert_eq!(snapshot.managed_with_serial(2).map(|d| d.id), Some(9));
    }

    #[test]
    fn test_snapshots_of_same_topology_compare_equal() {
        let a = DisplayEnumeration {
            displays: vec![raw(1, 0x1234, 1), raw(2, 0x1234, 2)],
            main_display_id: Some(1),
        };
        let b = DisplayEnumeration {
            displays: vec![raw(2, 0x1234, 2), raw(1, 0x1234, 1)],
            main_display_id: Some(1),
        };
        assert_eq!(
            TopologySnapshot::from_enumeration(a, IDENTITY),
            TopologySnapshot::from_enumeration(b, IDENTITY)
        );
    }

    #[test]
    fn test_self_mirror_master_is_dropped() {
        let mut display = raw(4, 0x1234, 1);
        display.mirror_master_id = Some(4);
        let snapshot = TopologySnapshot::from_enumeration(
            DisplayEnumeration { displays: vec![display], main_display_id: Some(4) },
            IDENTITY,
        );
        assert!(!snapshot.displays[0].has_mirror_flags());
    }
}
