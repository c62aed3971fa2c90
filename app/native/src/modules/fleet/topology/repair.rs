//! All-or-nothing topology repair.
//!
//! One reconfiguration transaction un-mirrors every managed display and lays
//! them out left to right from `x = 0`, anchor first. Because the display at
//! the global origin becomes main, the anchor ends up as the main display.
//! Any failing step cancels the whole transaction.

use super::TopologySnapshot;
use crate::modules::fleet::error::OsError;
use crate::modules::fleet::os::TopologyRepairer;
use crate::modules::fleet::types::DisplayId;

/// One placement decided by [`plan_layout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub id: DisplayId,
    pub x: i32,
    pub y: i32,
}

/// Computes the placements without touching the OS.
///
/// The anchor goes first; the remaining displays follow in order of their
/// current origin (ties by id). Each display keeps its current size, so its
/// mode is preserved.
#[must_use]
pub fn plan_layout(
    snapshot: &TopologySnapshot,
    managed_ids: &[DisplayId],
    anchor: DisplayId,
    gap: u32,
) -> Vec<Placement> {
    let mut rest: Vec<DisplayId> = managed_ids.iter().copied().filter(|id| *id != anchor).collect();
    rest.sort_by_key(|id| {
        let origin = snapshot.display(*id).map_or((i32::MAX, i32::MAX), |d| d.bounds.origin());
        (origin, *id)
    });

    let order = std::iter::once(anchor)
        .filter(|id| managed_ids.contains(id))
        .chain(rest);

    let mut x: i64 = 0;
    let mut placements = Vec::with_capacity(managed_ids.len());
    for id in order {
        let width = snapshot.display(id).map_or(0, |d| d.bounds.width);
        placements.push(Placement {
            id,
            x: i32::try_from(x).unwrap_or(i32::MAX),
            y: 0,
        });
        x += i64::from(width) + i64::from(gap);
    }
    placements
}

/// Applies the repair in a single transaction.
///
/// # Errors
///
/// Returns the first failing step. The transaction is cancelled in that case
/// and nothing is committed.
pub fn repair_topology(
    repairer: &dyn TopologyRepairer,
    snapshot: &TopologySnapshot,
    managed_ids: &[DisplayId],
    anchor: DisplayId,
    gap: u32,
) -> Result<Vec<Placement>, OsError> {
    let placements = plan_layout(snapshot, managed_ids, anchor, gap);
    let mut transaction = repairer.begin_transaction()?;

    let staged = managed_ids
        .iter()
        .try_for_each(|id| transaction.clear_mirror(*id))
        .and_then(|()| {
            placements.iter().try_for_each(|p| transaction.set_origin(p.id, p.x, p.y))
        });

    if let Err(err) = staged {
        tracing::warn!(error = %err, "topology repair step failed, cancelling transaction");
        transaction.cancel();
        return Err(err);
    }

    transaction.commit()?;
    tracing::info!(anchor, displays = placements.len(), "topology repaired");
    Ok(placements)
}

// ============================================================================
// Tests
// ============================================================================
