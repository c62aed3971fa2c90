//! Pure topology health evaluation.
//!
//! Detects the three arrangements the OS has been seen to leave behind after
//! creating or tearing down managed displays:
//!
//! 1. every desired managed display collapsed into one mirror set
//! 2. desired managed displays stacked at identical bounds without mirroring
//! 3. no physical display online and the main display outside the managed set
//!
//! Checks run in that order and the first match wins.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{Bounds, TopologySnapshot};
use crate::modules::fleet::types::DisplayId;

/// A pathological arrangement found in a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TopologyIssue {
    /// All desired managed displays resolve to one mirror root.
    CollapsedMirrorSet { root: DisplayId },
    /// At least two desired managed displays share identical bounds.
    OverlappingDisplays { bounds: Bounds },
    /// Only managed displays are online and none of them is main.
    MainOutsideManagedSet { main: Option<DisplayId> },
}

/// Outcome of [`evaluate_topology`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub issue: Option<TopologyIssue>,
    /// Online managed displays whose config wants them enabled, sorted by id.
    pub managed_display_ids: Vec<DisplayId>,
    /// Re-layout even without an issue: the OS can mis-mirror silently when
    /// only managed displays are online.
    pub force_normalization: bool,
}

impl HealthReport {
    #[must_use]
    pub const fn needs_repair(&self) -> bool { self.issue.is_some() || self.force_normalization }
}

/// Evaluates a stable snapshot against the serials that should be enabled.
#[must_use]
pub fn evaluate_topology(snapshot: &TopologySnapshot, desired_serials: &HashSet<u32>) -> HealthReport {
    let managed: Vec<_> = snapshot
        .managed()
        .filter(|d| desired_serials.contains(&d.serial_number))
        .collect();
    let managed_display_ids: Vec<DisplayId> = managed.iter().map(|d| d.id).collect();
    let has_physical = snapshot.has_physical_display();
    let force_normalization = !has_physical && managed.len() >= 2;

    let issue = collapsed_mirror_root(snapshot, &managed_display_ids)
        .map(|root| TopologyIssue::CollapsedMirrorSet { root })
        .or_else(|| {
            if managed.len() < 2 || managed.iter().any(|d| d.has_mirror_flags()) {
                return None;
            }
            let mut seen = HashSet::new();
            managed
                .iter()
                .find(|d| !seen.insert(d.bounds))
                .map(|d| TopologyIssue::OverlappingDisplays { bounds: d.bounds })
        })
        .or_else(|| {
            let main_is_managed = snapshot
                .main_display_id
                .is_some_and(|main| managed_display_ids.contains(&main));
            (!has_physical && !managed.is_empty() && !main_is_managed).then_some(
                TopologyIssue::MainOutsideManagedSet { main: snapshot.main_display_id },
            )
        });

    if let Some(issue) = issue {
        tracing::debug!(?issue, managed = ?managed_display_ids, "topology issue detected");
    }

    HealthReport {
        issue,
        managed_display_ids,
        force_normalization,
    }
}

/// Root shared by every managed display, when there are at least two of them.
///
/// The root is not required to report itself as part of a mirror set; the OS
/// omits that flag on the master in some configurations.
fn collapsed_mirror_root(snapshot: &TopologySnapshot, managed: &[DisplayId]) -> Option<DisplayId> {
    if managed.len() < 2 {
        return None;
    }

    let masters: HashMap<DisplayId, DisplayId> = snapshot
        .displays
        .iter()
        .filter_map(|d| d.mirror_master_id.map(|master| (d.id, master)))
        .collect();

    let mut roots = managed.iter().map(|id| mirror_root(&masters, *id));
    let first = roots.next()?;
    roots.all(|root| root == first).then_some(first)
}

/// Follows `mirror_master_id` links until a display without a master. Cycles
/// resolve to the smallest id on the cycle.
fn mirror_root(masters: &HashMap<DisplayId, DisplayId>, start: DisplayId) -> DisplayId {
    let mut visited = vec![start];
    let mut current = start;
    while let Some(&next) = masters.get(&current) {
        if let Some(pos) = visited.iter().position(|id| *id == next) {
            return visited[pos..].iter().copied().min().unwrap_or(next);
        }
        visited.push(next);
        current = next;
    }
    current
}

/// Picks the display the repair lays out first (and therefore makes main).
///
/// Order of preference:
/// 1. `preferred_main`, if it is managed and active
/// 2. the OS main display, if it is managed and active
/// 3. the managed display with the smallest `(x, y)` origin, ties by id
#[must_use]
pub fn select_anchor(
    snapshot: &TopologySnapshot,
    managed_ids: &[DisplayId],
    preferred_main: Option<DisplayId>,
) -> Option<DisplayId> {
    let viable = |id: DisplayId| {
        managed_ids.contains(&id) && snapshot.display(id).is_some_and(|d| d.is_active)
    };

    if let Some(preferred) = preferred_main.filter(|id| viable(*id)) {
        return Some(preferred);
    }
    if let Some(main) = snapshot.main_display_id.filter(|id| viable(*id)) {
        return Some(main);
    }

    managed_ids
        .iter()
        .copied()
        .min_by_key(|id| {
            let origin = snapshot.display(*id).map_or((i32::MAX, i32::MAX), |d| d.bounds.origin());
            (origin, *id)
        })
}

// ============================================================================
// Tests
// ============================================================================
