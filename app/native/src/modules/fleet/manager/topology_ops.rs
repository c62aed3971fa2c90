//! Topology recovery after a display comes up.

use super::FleetManager;
use crate::modules::fleet::error::{FleetError, FleetResult};
use crate::modules::fleet::topology::TopologySnapshot;
use crate::modules::fleet::topology::health::{evaluate_topology, select_anchor};
use crate::modules::fleet::topology::repair::repair_topology;
use crate::modules::fleet::topology::stability::{
    StabilityOutcome, StabilityPolicy, wait_for_stable_topology,
};
use crate::modules::fleet::types::DisplayId;

impl FleetManager {
    /// Drives the topology to a healthy state.
    ///
    /// Each pass waits for a stable snapshot, evaluates it and, if needed,
    /// applies one repair transaction. Proactive normalization is only done on
    /// the first pass so a healthy-but-normalizable topology is not repaired
    /// over and over. After the last pass a single fresh sample must find no
    /// issue; a committed repair is already settled.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::TopologyUnstableAfterEnable`] if the topology
    /// never settles and [`FleetError::TopologyRepairFailed`] if a repair is
    /// rejected or an issue survives every pass.
    pub(super) async fn recover_topology(&mut self, preferred_main: Option<DisplayId>) -> FleetResult<()> {
        let desired = self.desired_serials();
        let attempts = self.settings.max_repair_attempts.max(1);

        for attempt in 1..=attempts {
            let snapshot = self.stable_topology(self.settings.stability.policy()).await?;
            let report = evaluate_topology(&snapshot, &desired);
            let normalize = attempt == 1 && report.force_normalization;
            if report.issue.is_none() && !normalize {
                tracing::debug!(attempt, "topology healthy");
                return Ok(());
            }

            let Some(anchor) = select_anchor(&snapshot, &report.managed_display_ids, preferred_main)
            else {
                tracing::debug!(issue = ?report.issue, "no managed display to anchor a repair on");
                return Ok(());
            };

            tracing::info!(attempt, issue = ?report.issue, anchor, normalize, "repairing display topology");
            repair_topology(
                self.platform.repairer.as_ref(),
                &snapshot,
                &report.managed_display_ids,
                anchor,
                self.settings.layout_gap,
            )
            .map_err(|err| FleetError::TopologyRepairFailed(err.to_string()))?;
        }

        let snapshot = self.stable_topology(StabilityPolicy::fast()).await?;
        match evaluate_topology(&snapshot, &desired).issue {
            None => Ok(()),
            Some(issue) => {
                tracing::error!(?issue, "topology issue persists after repair");
                Err(FleetError::TopologyRepairFailed(format!("{issue:?} persists after repair")))
            }
        }
    }

    async fn stable_topology(&self, policy: StabilityPolicy) -> FleetResult<TopologySnapshot> {
        let teardown = &self.teardown;
        match wait_for_stable_topology(|| teardown.snapshot(), policy).await {
            StabilityOutcome::Stable(snapshot) => Ok(snapshot),
            StabilityOutcome::Unstable { samples } => {
                tracing::warn!(samples, "display topology did not stabilize");
                Err(FleetError::TopologyUnstableAfterEnable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetSettings;
    use crate::modules::fleet::manager::CreateRequest;
    use crate::modules::fleet::sim::{MirrorMode, SimulatedOs};
    use crate::modules::fleet::store::MemoryConfigStore;
    use crate::modules::fleet::topology::health::TopologyIssue;
    use crate::modules::fleet::types::{DEFAULT_MODE, PhysicalSize, PixelSize};

    fn request(serial: u32) -> CreateRequest {
        CreateRequest {
            name: format!("Display {serial}"),
            serial_num: serial,
            physical_size: PhysicalSize::new(600, 340),
            max_pixels: PixelSize::new(3840, 2160),
            modes: vec![DEFAULT_MODE],
        }
    }

    fn manager(os: &SimulatedOs) -> FleetManager {
        FleetManager::new(
            FleetSettings::default(),
            os.platform(),
            Box::new(MemoryConfigStore::default()),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_collapsed_mirror_is_repaired_on_enable() {
        let os = SimulatedOs::default();
        os.add_physical_display(2560, 1440);
        os.set_mirror_new_displays(MirrorMode::OmitRootFlag);
        let mut fleet = manager(&os);

        fleet.create(request(1)).await.unwrap();
        fleet.create(request(2)).await.unwrap();

        let snapshot = fleet.topology().unwrap();
        let desired = fleet.desired_serials();
        assert_eq!(evaluate_topology(&snapshot, &desired).issue, None);
        assert!(snapshot.managed().all(|d| !d.has_mirror_flags()));
        assert!(!os.transactions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_pass_repair_is_verified_by_one_fresh_sample() {
        let os = SimulatedOs::default();
        os.set_mirror_new_displays(MirrorMode::Flagged);
        let settings = FleetSettings { max_repair_attempts: 1, ..FleetSettings::default() };
        let mut fleet =
            FleetManager::new(settings, os.platform(), Box::new(MemoryConfigStore::default())).unwrap();
        fleet.create(request(1)).await.unwrap();
        let transactions_before = os.transactions().len();

        fleet.create(request(2)).await.unwrap();

        assert_eq!(os.transactions().len(), transactions_before + 1);
        let snapshot = fleet.topology().unwrap();
        assert_eq!(evaluate_topology(&snapshot, &fleet.desired_serials()).issue, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stacked_displays_are_laid_out_side_by_side() {
        let os = SimulatedOs::default();
        os.add_physical_display(2560, 1440);
        os.set_stack_new_displays(true);
        let mut fleet = manager(&os);

        fleet.create(request(1)).await.unwrap();
        fleet.create(request(2)).await.unwrap();

        let snapshot = fleet.topology().unwrap();
        let origins: Vec<_> = snapshot.managed().map(|d| d.bounds.origin()).collect();
        assert_eq!(origins.len(), 2);
        assert_ne!(origins[0], origins[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_repair_rolls_back_enable() {
        let os = SimulatedOs::default();
        os.set_mirror_new_displays(MirrorMode::Flagged);
        let mut fleet = manager(&os);
        let first = fleet.create(request(1)).await.unwrap();
        os.set_reject_transactions(true);

        let result = fleet.create(request(2)).await;

        assert!(matches!(result, Err(FleetError::TopologyRepairFailed(_))));
        assert!(fleet.is_running(first.config_id));
        assert_eq!(fleet.running_ids().len(), 1);
        assert_eq!(os.online_managed_serials(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oscillating_topology_fails_enable() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os);
        os.set_oscillate_main(true);

        let result = fleet.create(request(1)).await;
        assert!(matches!(result, Err(FleetError::TopologyUnstableAfterEnable)));
        assert!(fleet.configs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_outside_managed_set_is_reclaimed() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os);
        let info = fleet.create(request(1)).await.unwrap();
        os.set_main(None);

        let snapshot = fleet.topology().unwrap();
        let report = evaluate_topology(&snapshot, &fleet.desired_serials());
        assert!(matches!(report.issue, Some(TopologyIssue::MainOutsideManagedSet { .. })));

        fleet.recover_topology(None).await.unwrap();
        assert!(fleet.topology().unwrap().is_main(info.display_id));
    }
}
