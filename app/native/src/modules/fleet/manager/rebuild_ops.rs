//! Rebuild coordination.
//!
//! A running display has to be recreated when a field baked into its OS
//! descriptor changes. Two strategies exist:
//!
//! - **Single**: tear down only the target, recreate it, recover the topology
//!   with the target kept as main if it was main.
//! - **Fleet**: used when the target is the OS main display and at least two
//!   managed displays are running. Tearing down the main display alone can
//!   leave some OS builds with a topology they never recover from, so every
//!   running display goes down together (target first), the fleet waits for
//!   all of them to go offline as one gate, and they come back in the same
//!   order followed by a single recovery pass.

use tokio::time::sleep;

use super::{FleetManager, InFlight};
use crate::modules::fleet::error::{FleetError, FleetResult};
use crate::modules::fleet::types::{ConfigId, DisplayState, RuntimeInfo};

/// Which rebuild strategy to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildStrategy {
    Single,
    Fleet,
}

/// A decided rebuild: strategy plus teardown/recreation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildPlan {
    pub strategy: RebuildStrategy,
    pub target: ConfigId,
    /// Target first, then the other running displays in persisted order.
    pub order: Vec<ConfigId>,
    pub target_was_main: bool,
}

impl RebuildPlan {
    /// Decides how to rebuild `target`.
    ///
    /// `running` lists the running configs in persisted order. Displays that
    /// are configured but not running are never swept into a fleet rebuild.
    #[must_use]
    pub fn new(target: ConfigId, target_was_main: bool, running: &[ConfigId]) -> Self {
        let strategy = if target_was_main && running.len() >= 2 {
            RebuildStrategy::Fleet
        } else {
            RebuildStrategy::Single
        };

        let order = match strategy {
            RebuildStrategy::Single => vec![target],
            RebuildStrategy::Fleet => std::iter::once(target)
                .chain(running.iter().copied().filter(|id| *id != target))
                .collect(),
        };

        Self { strategy, target, order, target_was_main }
    }
}

impl FleetManager {
    /// Recreates a running display.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidConfiguration`] if the display is not
    /// running, [`FleetError::TeardownTimedOut`] if the old display(s) never
    /// went away (nothing is recreated in that case), or any creation or
    /// recovery error.
    pub async fn rebuild(&mut self, id: ConfigId) -> FleetResult<RuntimeInfo> {
        self.index_of(id)?;
        let Some(current) = self.runtime_info(id) else {
            return Err(FleetError::InvalidConfiguration("display is not running".to_string()));
        };

        let target_was_main = self.topology().is_some_and(|s| s.is_main(current.display_id));
        let plan = RebuildPlan::new(id, target_was_main, &self.running_ids());
        tracing::info!(
            config_id = %id,
            strategy = ?plan.strategy,
            displays = plan.order.len(),
            target_was_main,
            "rebuilding display"
        );

        let owned = self.begin_in_flight(InFlight::BringUp(id));
        let result = match plan.strategy {
            RebuildStrategy::Single => self.rebuild_single(&plan).await,
            RebuildStrategy::Fleet => self.rebuild_fleet(&plan).await,
        };
        self.end_in_flight(owned);
        result
    }

    async fn rebuild_single(&mut self, plan: &RebuildPlan) -> FleetResult<RuntimeInfo> {
        let id = plan.target;
        self.set_state(id, DisplayState::Rebuilding);
        drop(self.running.remove(&id));

        let result = self.recreate_single(plan).await;
        let state = if result.is_ok() { DisplayState::Running } else { DisplayState::Disabled };
        self.set_state(id, state);
        if let Err(err) = &result {
            tracing::error!(config_id = %id, error = %err, "display rebuild failed");
        }
        result
    }

    async fn recreate_single(&mut self, plan: &RebuildPlan) -> FleetResult<RuntimeInfo> {
        let id = plan.target;
        let budget = self.settle_previous(id).await?;
        sleep(self.settings.creation_cooldown()).await;

        let info = self.launch(id, budget).await?;
        let preferred_main = plan.target_was_main.then_some(info.display_id);
        if let Err(err) = self.recover_topology(preferred_main).await {
            self.roll_back(id).await;
            return Err(err);
        }
        Ok(info)
    }

    async fn rebuild_fleet(&mut self, plan: &RebuildPlan) -> FleetResult<RuntimeInfo> {
        let mut serials = Vec::with_capacity(plan.order.len());
        let mut generations = Vec::with_capacity(plan.order.len());
        for id in &plan.order {
            self.set_state(*id, DisplayState::Rebuilding);
            if let Some(running) = self.running.remove(id) {
                tracing::debug!(config_id = %id, display_id = running.handle.display_id(), "tearing down for fleet rebuild");
                serials.push(running.serial);
                generations.push((*id, running.generation));
            }
        }

        let gate = self
            .teardown
            .wait_for_all_offline(&serials, self.settings.rebuild_offline_timeout())
            .await;
        if let Err(remaining) = gate {
            for id in &plan.order {
                self.set_state(*id, DisplayState::Disabled);
            }
            tracing::error!(?remaining, "fleet rebuild aborted, displays still online");
            return Err(FleetError::TeardownTimedOut);
        }

        sleep(self.settings.creation_cooldown()).await;

        let mut target_result = Err(FleetError::CreationFailed("target was not recreated".to_string()));
        for (id, generation) in generations {
            let budget = if self.teardown.termination_confirmed(id, generation) {
                self.settings.clean_retry
            } else {
                self.settings.conservative_retry
            };

            let result = self.launch(id, budget).await;
            let state = if result.is_ok() { DisplayState::Running } else { DisplayState::Disabled };
            self.set_state(id, state);
            match result {
                Ok(info) if id == plan.target => target_result = Ok(info),
                Ok(_) => {}
                Err(err) if id == plan.target => target_result = Err(err),
                Err(err) => {
                    tracing::error!(config_id = %id, error = %err, "display lost during fleet rebuild");
                }
            }
        }

        let info = match target_result {
            Ok(info) => info,
            Err(err) => {
                self.recover_survivors(plan).await;
                return Err(err);
            }
        };
        if let Err(err) = self.recover_topology(Some(info.display_id)).await {
            self.roll_back(plan.target).await;
            self.set_state(plan.target, DisplayState::Disabled);
            return Err(err);
        }
        Ok(info)
    }

    /// Lays out the displays that came back when the target did not.
    ///
    /// The target was main, so the first survivor in plan order takes over.
    async fn recover_survivors(&mut self, plan: &RebuildPlan) {
        let Some(anchor) = plan
            .order
            .iter()
            .filter(|id| **id != plan.target)
            .find_map(|id| self.runtime_info(*id))
        else {
            return;
        };

        tracing::info!(config_id = %anchor.config_id, "target not recreated, recovering the rest of the fleet");
        if let Err(err) = self.recover_topology(Some(anchor.display_id)).await {
            tracing::error!(error = %err, "topology recovery after failed fleet rebuild failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_main_target_with_two_running_uses_fleet_path() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let plan = RebuildPlan::new(b, true, &[a, b]);
        assert_eq!(plan.strategy, RebuildStrategy::Fleet);
        assert_eq!(plan.order, vec![b, a]);
    }

    #[test]
    fn test_non_main_target_uses_single_path() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let plan = RebuildPlan::new(a, false, &[a, b]);
        assert_eq!(plan.strategy, RebuildStrategy::Single);
        assert_eq!(plan.order, vec![a]);
    }

    #[test]
    fn test_lone_main_display_uses_single_path() {
        let a = Uuid::now_v7();
        let plan = RebuildPlan::new(a, true, &[a]);
        assert_eq!(plan.strategy, RebuildStrategy::Single);
    }

    #[test]
    fn test_fleet_order_keeps_persisted_order_after_target() {
        let ids: Vec<_> = (0..4).map(|_| Uuid::now_v7()).collect();
        let plan = RebuildPlan::new(ids[2], true, &ids);
        assert_eq!(plan.order, vec![ids[2], ids[0], ids[1], ids[3]]);
    }
}
