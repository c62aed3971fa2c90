//! Config lifecycle: create, enable, disable, destroy, edits and restore.

use std::collections::HashSet;

use tokio::time::sleep;

use super::{FleetManager, InFlight, RunningDisplay};
use crate::modules::fleet::backoff::RetryBudget;
use crate::modules::fleet::error::{FleetError, FleetResult};
use crate::modules::fleet::os::{DisplaySettings, RuntimeHandle};
use crate::modules::fleet::store::smallest_unused_serial;
use crate::modules::fleet::teardown::TeardownOutcome;
use crate::modules::fleet::types::{
    ConfigId, ConfigUpdate, DisplayConfig, DisplayMode, DisplayState, MoveDirection, PhysicalSize,
    PixelSize, RestoreFailure, RuntimeInfo,
};

/// Everything needed to create a new managed display.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub name: String,
    pub serial_num: u32,
    pub physical_size: PhysicalSize,
    /// Upper bound every mode's backing store must fit in.
    pub max_pixels: PixelSize,
    pub modes: Vec<DisplayMode>,
}

pub(crate) fn validate_name(name: &str) -> FleetResult<()> {
    if name.trim().is_empty() {
        return Err(FleetError::InvalidConfiguration("name must not be blank".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_physical_size(size: PhysicalSize) -> FleetResult<()> {
    if !size.is_valid() {
        return Err(FleetError::InvalidConfiguration(
            "physical size must be non-zero".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_modes(modes: &[DisplayMode]) -> FleetResult<()> {
    if modes.is_empty() {
        return Err(FleetError::InvalidConfiguration("at least one mode is required".to_string()));
    }
    if let Some(mode) = modes.iter().find(|m| !m.is_valid()) {
        return Err(FleetError::InvalidConfiguration(format!("invalid mode {mode}")));
    }
    Ok(())
}

/// Every mode's backing store must fit in `max_pixels`.
pub(crate) fn validate_mode_envelope(modes: &[DisplayMode], max_pixels: PixelSize) -> FleetResult<()> {
    if let Some(mode) = modes.iter().find(|m| !m.backing_pixels().fits_within(&max_pixels)) {
        return Err(FleetError::InvalidConfiguration(format!(
            "mode {mode} exceeds {}x{} pixels",
            max_pixels.width, max_pixels.height
        )));
    }
    Ok(())
}

impl FleetManager {
    // ========================================================================
    // Create / destroy
    // ========================================================================

    /// Creates, persists and enables a new display.
    ///
    /// Creation is all-or-nothing: if the display cannot be brought up, the
    /// config is removed again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`FleetError::DuplicateSerialNumber`], or
    /// any error of [`enable`](Self::enable).
    pub async fn create(&mut self, request: CreateRequest) -> FleetResult<RuntimeInfo> {
        validate_name(&request.name)?;
        validate_physical_size(request.physical_size)?;
        validate_modes(&request.modes)?;
        validate_mode_envelope(&request.modes, request.max_pixels)?;
        self.ensure_serial_available(request.serial_num, None)?;

        let mut config = DisplayConfig::new(
            request.name.trim(),
            request.serial_num,
            request.physical_size,
            request.modes,
        );
        config.desired_enabled = true;
        let id = config.id;

        self.configs.push(config);
        self.states.insert(id, DisplayState::Disabled);
        if let Err(err) = self.persist() {
            self.configs.retain(|c| c.id != id);
            self.states.remove(&id);
            return Err(err);
        }
        tracing::info!(config_id = %id, serial = request.serial_num, "display config created");

        let owned = self.begin_in_flight(InFlight::Create(id));
        let result = self.enable(id).await;
        self.end_in_flight(owned);

        match result {
            Ok(info) => Ok(info),
            Err(err) => {
                tracing::warn!(config_id = %id, error = %err, "removing display that failed to start");
                self.configs.retain(|c| c.id != id);
                self.states.remove(&id);
                if let Err(persist_err) = self.persist() {
                    tracing::error!(config_id = %id, error = %persist_err, "failed to remove config");
                }
                Err(err)
            }
        }
    }

    /// Removes a config, tearing its display down if running.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`] or a storage error.
    pub fn destroy(&mut self, id: ConfigId) -> FleetResult<()> {
        let index = self.index_of(id)?;
        if let Some(running) = self.running.remove(&id) {
            tracing::debug!(config_id = %id, display_id = running.handle.display_id(), "releasing display");
        }
        let config = self.configs.remove(index);
        self.states.remove(&id);
        self.persist()?;
        tracing::info!(config_id = %id, serial = config.serial_num, "display config destroyed");
        Ok(())
    }

    // ========================================================================
    // Enable / disable
    // ========================================================================

    /// Brings a display up.
    ///
    /// `desired_enabled` is persisted before any OS call. A previous display
    /// of the same config that may still be alive is settled first; the
    /// creation retry budget depends on how cleanly it went away.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::TeardownTimedOut`], [`FleetError::CreationFailed`],
    /// or a topology recovery error. Bookkeeping is rolled back to "not
    /// running" before any post-creation error is returned.
    pub async fn enable(&mut self, id: ConfigId) -> FleetResult<RuntimeInfo> {
        let index = self.index_of(id)?;
        if !self.configs[index].desired_enabled {
            self.configs[index].desired_enabled = true;
            self.persist()?;
        }
        if let Some(info) = self.runtime_info(id) {
            return Ok(info);
        }

        let owned = self.begin_in_flight(InFlight::BringUp(id));
        self.set_state(id, DisplayState::Enabling);
        let result = self.bring_up(id).await;
        self.end_in_flight(owned);
        match &result {
            Ok(info) => {
                self.set_state(id, DisplayState::Running);
                tracing::info!(config_id = %id, display_id = info.display_id, generation = info.generation, "display enabled");
            }
            Err(err) => {
                self.set_state(id, DisplayState::Disabled);
                tracing::error!(config_id = %id, error = %err, "failed to enable display");
            }
        }
        result
    }

    async fn bring_up(&mut self, id: ConfigId) -> FleetResult<RuntimeInfo> {
        let budget = self.settle_previous(id).await?;
        let info = self.launch(id, budget).await?;
        if let Err(err) = self.recover_topology(None).await {
            self.roll_back(id).await;
            return Err(err);
        }
        Ok(info)
    }

    /// Tears a display down and persists `desired_enabled = false`.
    ///
    /// The teardown itself completes asynchronously; the generation counter
    /// outlives the handle so a following enable waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`] or a storage error.
    pub fn disable(&mut self, id: ConfigId) -> FleetResult<()> {
        let index = self.index_of(id)?;
        self.configs[index].desired_enabled = false;
        self.persist()?;

        if let Some(running) = self.running.remove(&id) {
            self.set_state(id, DisplayState::Disabling);
            tracing::info!(
                config_id = %id,
                display_id = running.handle.display_id(),
                generation = running.generation,
                "disabling display"
            );
            drop(running);
        }
        self.set_state(id, DisplayState::Disabled);
        Ok(())
    }

    // ========================================================================
    // Bring-up building blocks
    // ========================================================================

    /// Waits out any previous display of this config and picks a retry budget.
    pub(super) async fn settle_previous(&mut self, id: ConfigId) -> FleetResult<RetryBudget> {
        let index = self.index_of(id)?;
        let serial = self.launched_serials.get(&id).copied().unwrap_or(self.configs[index].serial_num);
        let online = self.topology().is_some_and(|s| s.managed_with_serial(serial).is_some());

        match self.generations.current(id) {
            Some(generation) if online || self.teardown.teardown_pending(id) => {
                tracing::debug!(config_id = %id, generation, serial, online, "settling previous teardown");
                let outcome = self
                    .teardown
                    .settle_teardown(
                        id,
                        generation,
                        serial,
                        self.settings.termination_timeout(),
                        self.settings.offline_timeout(),
                    )
                    .await?;
                Ok(self.budget_for(outcome))
            }
            None if online => {
                tracing::debug!(config_id = %id, serial, "serial still online, waiting");
                if self.teardown.wait_for_offline(serial, self.settings.offline_timeout()).await {
                    Ok(self.settings.conservative_retry)
                } else {
                    Err(FleetError::TeardownTimedOut)
                }
            }
            _ => Ok(self.settings.clean_retry),
        }
    }

    pub(super) const fn budget_for(&self, outcome: TeardownOutcome) -> RetryBudget {
        match outcome {
            TeardownOutcome::Confirmed => self.settings.clean_retry,
            TeardownOutcome::OfflineOnly => self.settings.conservative_retry,
        }
    }

    /// Creates the display, records it as running and pushes its modes.
    pub(super) async fn launch(&mut self, id: ConfigId, budget: RetryBudget) -> FleetResult<RuntimeInfo> {
        let index = self.index_of(id)?;
        let config = self.configs[index].clone();
        let handle = self.create_with_retries(&config, budget).await?;

        let generation = self.generations.bump(id);
        self.launched_serials.insert(id, config.serial_num);
        self.running.insert(id, RunningDisplay { handle, generation, serial: config.serial_num });

        let applied = self.running.get(&id).is_some_and(|running| {
            self.platform
                .backend
                .apply_settings(running.handle.as_ref(), &DisplaySettings::from_modes(&config.modes))
        });
        if !applied {
            self.roll_back(id).await;
            return Err(FleetError::CreationFailed("display rejected its modes".to_string()));
        }

        self.runtime_info(id).ok_or(FleetError::ConfigNotFound(id))
    }

    async fn create_with_retries(
        &self,
        config: &DisplayConfig,
        budget: RetryBudget,
    ) -> FleetResult<RuntimeHandle> {
        let descriptor = self.descriptor(config);
        let policy = budget.policy();
        let attempts = budget.attempts.max(1);
        let generation = self.generations.current(config.id).unwrap_or(0) + 1;

        let mut last_error = None;
        for attempt in 1..=attempts {
            let on_terminate = self.termination_callback(config.id, generation);
            match self.platform.backend.create_display(&descriptor, on_terminate) {
                Ok(handle) => {
                    tracing::debug!(config_id = %config.id, attempt, display_id = handle.display_id(), "display created");
                    return Ok(handle);
                }
                Err(err) => {
                    tracing::warn!(config_id = %config.id, attempt, attempts, error = %err, "display creation failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        sleep(policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(FleetError::CreationFailed(
            last_error.map_or_else(|| "no attempt made".to_string(), |err| err.to_string()),
        ))
    }

    /// Drops a freshly created display after a failure and waits for it to go.
    pub(super) async fn roll_back(&mut self, id: ConfigId) {
        let Some(running) = self.running.remove(&id) else {
            return;
        };
        let serial = running.serial;
        tracing::warn!(config_id = %id, generation = running.generation, "rolling back display");
        drop(running);

        if !self.teardown.wait_for_offline(serial, self.settings.offline_timeout()).await {
            tracing::warn!(config_id = %id, serial, "rolled back display is still online");
        }
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Replaces the mode list. Returns `true` if the display was rebuilt.
    ///
    /// A running display is only rebuilt when its backing store has to grow;
    /// otherwise the new modes are pushed to it live.
    ///
    /// # Errors
    ///
    /// Returns a validation, storage or rebuild error.
    pub async fn apply_modes(&mut self, id: ConfigId, modes: Vec<DisplayMode>) -> FleetResult<bool> {
        validate_modes(&modes)?;
        let index = self.index_of(id)?;

        let mut next = self.configs[index].clone();
        next.modes = modes;
        let rebuild = self.is_running(id) && self.configs[index].requires_rebuild(&next);
        let settings = DisplaySettings::from_modes(&next.modes);
        self.configs[index] = next;
        self.persist()?;

        if rebuild {
            self.rebuild(id).await?;
            return Ok(true);
        }

        if let Some(running) = self.running.get(&id)
            && !self.platform.backend.apply_settings(running.handle.as_ref(), &settings)
        {
            tracing::warn!(config_id = %id, "display rejected updated modes");
        }
        Ok(false)
    }

    /// Edits identity fields. Returns `true` if the display was rebuilt.
    ///
    /// # Errors
    ///
    /// Returns a validation, storage or rebuild error.
    pub async fn update_config(&mut self, id: ConfigId, update: ConfigUpdate) -> FleetResult<bool> {
        let index = self.index_of(id)?;
        let mut next = self.configs[index].clone();

        if let Some(name) = update.name {
            validate_name(&name)?;
            next.name = name.trim().to_string();
        }
        if let Some(size) = update.physical_size {
            validate_physical_size(size)?;
            next.physical_width_mm = size.width_mm;
            next.physical_height_mm = size.height_mm;
        }
        if let Some(serial) = update.serial_num
            && serial != next.serial_num
        {
            self.ensure_serial_available(serial, Some(id))?;
            next.serial_num = serial;
        }

        if next == self.configs[index] {
            return Ok(false);
        }

        let rebuild = self.is_running(id) && self.configs[index].requires_rebuild(&next);
        self.configs[index] = next;
        self.persist()?;

        if rebuild {
            self.rebuild(id).await?;
        }
        Ok(rebuild)
    }

    /// Moves a config one position. Returns `false` at the boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`] or a storage error.
    pub fn move_config(&mut self, id: ConfigId, direction: MoveDirection) -> FleetResult<bool> {
        let index = self.index_of(id)?;
        let target = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => Some(index + 1).filter(|i| *i < self.configs.len()),
        };
        let Some(target) = target else {
            return Ok(false);
        };

        self.configs.swap(index, target);
        if let Err(err) = self.persist() {
            self.configs.swap(index, target);
            return Err(err);
        }
        Ok(true)
    }

    /// Smallest serial (from 1) used neither by a config nor an online managed display.
    #[must_use]
    pub fn next_available_serial(&self) -> u32 {
        let mut used: HashSet<u32> = self.configs.iter().map(|c| c.serial_num).collect();
        if let Some(snapshot) = self.topology() {
            used.extend(snapshot.managed().map(|d| d.serial_number));
        }
        smallest_unused_serial(&used)
    }

    fn ensure_serial_available(&self, serial: u32, except: Option<ConfigId>) -> FleetResult<()> {
        if serial == 0 {
            return Err(FleetError::InvalidConfiguration("serial number must be non-zero".to_string()));
        }
        if self.configs.iter().any(|c| Some(c.id) != except && c.serial_num == serial) {
            return Err(FleetError::DuplicateSerialNumber(serial));
        }
        if self.topology().is_some_and(|s| s.managed_with_serial(serial).is_some()) {
            return Err(FleetError::DuplicateSerialNumber(serial));
        }
        Ok(())
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Brings back every config that wants to be enabled, in persisted order.
    ///
    /// Failures do not stop the pass; they are recorded and returned.
    pub async fn restore(&mut self) -> Vec<RestoreFailure> {
        self.drain_terminations();
        self.restore_failures.clear();

        let pending: Vec<ConfigId> = self
            .configs
            .iter()
            .filter(|c| c.desired_enabled && !self.is_running(c.id))
            .map(|c| c.id)
            .collect();
        tracing::info!(count = pending.len(), "restoring displays");

        for id in pending {
            if let Err(err) = self.enable(id).await
                && let Some(config) = self.config(id)
            {
                self.restore_failures.push(RestoreFailure {
                    config_id: id,
                    name: config.name.clone(),
                    serial: config.serial_num,
                    message: err.to_string(),
                });
            }
        }

        if !self.restore_failures.is_empty() {
            tracing::warn!(failed = self.restore_failures.len(), "some displays could not be restored");
        }
        self.restore_failures.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetSettings;
    use crate::modules::fleet::sim::SimulatedOs;
    use crate::modules::fleet::store::MemoryConfigStore;
    use crate::modules::fleet::types::DEFAULT_MODE;

    fn request(name: &str, serial: u32) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            serial_num: serial,
            physical_size: PhysicalSize::new(600, 340),
            max_pixels: PixelSize::new(3840, 2160),
            modes: vec![DEFAULT_MODE],
        }
    }

    fn manager(os: &SimulatedOs, store: &MemoryConfigStore) -> FleetManager {
        FleetManager::new(FleetSettings::default(), os.platform(), Box::new(store.clone())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_persists_and_runs() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);

        let info = fleet.create(request("Desk", 3)).await.unwrap();

        assert!(fleet.is_running(info.config_id));
        assert_eq!(fleet.display_state(info.config_id), Some(DisplayState::Running));
        assert_eq!(info.generation, 1);
        let saved = store.snapshot();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].desired_enabled);
        assert_eq!(os.online_managed_serials(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_duplicate_serial() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);
        fleet.create(request("A", 2)).await.unwrap();

        let result = fleet.create(request("B", 2)).await;
        assert!(matches!(result, Err(FleetError::DuplicateSerialNumber(2))));
        assert_eq!(fleet.configs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_modes_exceeding_max_pixels() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os, &MemoryConfigStore::default());
        let mut req = request("Big", 1);
        req.max_pixels = PixelSize::new(1280, 720);

        let result = fleet.create(req).await;
        assert!(matches!(result, Err(FleetError::InvalidConfiguration(_))));
        assert!(os.creations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_leaves_no_config() {
        let os = SimulatedOs::default();
        os.fail_creations_for_serial(1, u32::MAX);
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);

        let result = fleet.create(request("Flaky", 1)).await;

        assert!(matches!(result, Err(FleetError::CreationFailed(_))));
        assert!(fleet.configs().is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_persists_before_teardown_and_keeps_generation() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);
        let info = fleet.create(request("Desk", 1)).await.unwrap();

        fleet.disable(info.config_id).unwrap();

        assert!(!fleet.is_running(info.config_id));
        assert_eq!(fleet.display_state(info.config_id), Some(DisplayState::Disabled));
        assert_eq!(fleet.generation(info.config_id), Some(1));
        assert!(!store.snapshot()[0].desired_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenable_bumps_generation() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os, &MemoryConfigStore::default());
        let info = fleet.create(request("Desk", 1)).await.unwrap();
        fleet.disable(info.config_id).unwrap();

        let again = fleet.enable(info.config_id).await.unwrap();
        assert_eq!(again.generation, 2);
        assert_eq!(os.online_managed_serials(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_modes_roll_back_enable() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);
        let info = fleet.create(request("Desk", 1)).await.unwrap();
        fleet.disable(info.config_id).unwrap();
        os.set_reject_settings(true);

        let result = fleet.enable(info.config_id).await;

        assert!(matches!(result, Err(FleetError::CreationFailed(_))));
        assert!(fleet.running_ids().is_empty());
        assert_eq!(fleet.display_state(info.config_id), Some(DisplayState::Disabled));
        assert_eq!(fleet.generation(info.config_id), Some(2));
        assert!(os.online_managed_serials().is_empty());
        assert!(store.snapshot()[0].desired_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_at_boundary_does_not_persist() {
        let os = SimulatedOs::default();
        let first = DisplayConfig::new("A", 1, PhysicalSize::new(1, 1), vec![DEFAULT_MODE]);
        let second = DisplayConfig::new("B", 2, PhysicalSize::new(1, 1), vec![DEFAULT_MODE]);
        let store = MemoryConfigStore::with_configs(vec![first.clone(), second.clone()]);
        let mut fleet = manager(&os, &store);

        assert!(!fleet.move_config(first.id, MoveDirection::Up).unwrap());
        assert!(!fleet.move_config(second.id, MoveDirection::Down).unwrap());
        assert_eq!(store.save_count(), 0);

        assert!(fleet.move_config(first.id, MoveDirection::Down).unwrap());
        assert_eq!(store.save_count(), 1);
        let order: Vec<_> = store.snapshot().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![second.id, first.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_available_serial_skips_online_displays() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::with_configs(vec![DisplayConfig::new(
            "A",
            1,
            PhysicalSize::new(1, 1),
            vec![DEFAULT_MODE],
        )]);
        os.add_foreign_managed_display(2);
        let fleet = manager(&os, &store);

        assert_eq!(fleet.next_available_serial(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_modes_apply_live() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os, &MemoryConfigStore::default());
        let mut req = request("Desk", 1);
        req.modes = vec![DisplayMode::new(2560, 1440, 60.0, false)];
        let info = fleet.create(req).await.unwrap();

        let rebuilt = fleet
            .apply_modes(info.config_id, vec![DisplayMode::new(1920, 1080, 60.0, false)])
            .await
            .unwrap();

        assert!(!rebuilt);
        assert_eq!(fleet.runtime_info(info.config_id), Some(info));
        assert_eq!(os.creations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_of_running_display_rebuilds() {
        let os = SimulatedOs::default();
        let mut fleet = manager(&os, &MemoryConfigStore::default());
        let info = fleet.create(request("Desk", 1)).await.unwrap();

        let update = ConfigUpdate { name: Some("Studio".to_string()), ..ConfigUpdate::default() };
        assert!(fleet.update_config(info.config_id, update).await.unwrap());

        let creations = os.creations();
        assert_eq!(creations.len(), 2);
        assert_eq!(creations[1].name, "Studio");
        assert_eq!(fleet.generation(info.config_id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_records_failures_and_continues() {
        let os = SimulatedOs::default();
        let mut broken = DisplayConfig::new("Broken", 1, PhysicalSize::new(1, 1), vec![DEFAULT_MODE]);
        broken.desired_enabled = true;
        let mut fine = DisplayConfig::new("Fine", 2, PhysicalSize::new(1, 1), vec![DEFAULT_MODE]);
        fine.desired_enabled = true;
        let store = MemoryConfigStore::with_configs(vec![broken.clone(), fine.clone()]);
        os.fail_creations_for_serial(1, u32::MAX);
        let mut fleet = manager(&os, &store);

        let failures = fleet.restore().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].config_id, broken.id);
        assert_eq!(failures[0].serial, 1);
        assert!(fleet.is_running(fine.id));
        assert!(store.snapshot()[0].desired_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_termination_disables_without_touching_desire() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let mut fleet = manager(&os, &store);
        let info = fleet.create(request("Desk", 4)).await.unwrap();

        os.terminate_display(4);
        let termination = fleet.recv_termination().await.unwrap();
        fleet.on_display_terminated(termination);

        assert!(!fleet.is_running(info.config_id));
        assert_eq!(fleet.display_state(info.config_id), Some(DisplayState::Disabled));
        assert!(store.snapshot()[0].desired_enabled);
    }
}
