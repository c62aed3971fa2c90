//! The virtual display fleet manager.
//!
//! `FleetManager` owns every piece of mutable fleet state: the ordered config
//! list, the runtime handles of running displays, the per-config lifecycle
//! state and the generation counters. It is driven by exactly one task (see
//! [`crate::modules::fleet::actor`]); OS callbacks never touch it directly.
//!
//! The `impl FleetManager` is split by concern:
//! - `lifecycle_ops` - create, enable, disable, destroy, edits and restore
//! - `rebuild_ops` - single and coordinated fleet rebuilds
//! - `topology_ops` - post-change topology recovery

mod lifecycle_ops;
mod rebuild_ops;
mod topology_ops;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use lifecycle_ops::CreateRequest;
pub(crate) use lifecycle_ops::{
    validate_mode_envelope, validate_modes, validate_name, validate_physical_size,
};
pub use rebuild_ops::{RebuildPlan, RebuildStrategy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::{FleetError, FleetResult};
use super::os::{
    DisplayDescriptor, ManagedIdentity, OsEvent, Platform, RuntimeHandle, SubscriptionToken,
    Termination, TerminationCallback,
};
use super::store::ConfigPersistence;
use super::teardown::{GenerationTable, TeardownCoordinator, run_event_pump};
use super::topology::TopologySnapshot;
use super::types::{
    ConfigId, DisplayConfig, DisplayState, Generation, RestoreFailure, RuntimeInfo,
};
use crate::config::FleetSettings;

/// A display this process is currently running.
#[derive(Debug)]
struct RunningDisplay {
    handle: RuntimeHandle,
    generation: Generation,
    /// Serial the display was created with; the config may have changed since.
    serial: u32,
}

impl RunningDisplay {
    fn info(&self, config_id: ConfigId) -> RuntimeInfo {
        RuntimeInfo {
            config_id,
            display_id: self.handle.display_id(),
            generation: self.generation,
        }
    }
}

/// Config a running command may leave half-built if it is cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InFlight {
    /// A new config, persisted but not yet confirmed running.
    Create(ConfigId),
    /// A config whose display is being brought up or recreated.
    BringUp(ConfigId),
}

/// Read-only status of one config.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStatus {
    pub config: DisplayConfig,
    pub state: DisplayState,
    pub runtime: Option<RuntimeInfo>,
}

/// Owner of all fleet state.
pub struct FleetManager {
    settings: FleetSettings,
    platform: Platform,
    identity: ManagedIdentity,
    store: Box<dyn ConfigPersistence>,

    /// Configs in persisted (user) order.
    configs: Vec<DisplayConfig>,
    running: HashMap<ConfigId, RunningDisplay>,
    states: HashMap<ConfigId, DisplayState>,
    /// Serial of the most recent display created per config.
    launched_serials: HashMap<ConfigId, u32>,
    generations: Arc<GenerationTable>,
    teardown: Arc<TeardownCoordinator>,
    restore_failures: Vec<RestoreFailure>,
    in_flight: Option<InFlight>,

    events: mpsc::UnboundedSender<OsEvent>,
    terminations: mpsc::UnboundedReceiver<Termination>,
    pump: JoinHandle<()>,
    subscription: Option<SubscriptionToken>,
}

impl FleetManager {
    /// Loads the persisted configs and starts listening to the OS.
    ///
    /// Must be called from within a tokio runtime: the OS event pump is
    /// spawned on it. A failed topology subscription is not fatal; offline
    /// checks fall back to polling.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Storage`] if the persisted list cannot be loaded.
    pub fn new(
        settings: FleetSettings,
        platform: Platform,
        store: Box<dyn ConfigPersistence>,
    ) -> FleetResult<Self> {
        let configs = store.load()?;
        let identity = settings.identity();
        let generations = Arc::new(GenerationTable::default());
        let teardown = Arc::new(TeardownCoordinator::new(
            platform.inspector.clone(),
            identity,
            generations.clone(),
            settings.event_poll_interval(),
            settings.fallback_poll_interval(),
        ));

        let (events, events_rx) = mpsc::unbounded_channel();
        let (terminations_tx, terminations) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_event_pump(teardown.clone(), events_rx, terminations_tx));

        let topology_events = events.clone();
        let subscription = match platform.inspector.subscribe(Arc::new(move || {
            let _ = topology_events.send(OsEvent::TopologyChanged);
        })) {
            Ok(token) => {
                teardown.set_event_driven(true);
                Some(token)
            }
            Err(err) => {
                tracing::warn!(error = %err, "topology events unavailable, polling instead");
                None
            }
        };

        let states = configs.iter().map(|c| (c.id, DisplayState::Disabled)).collect();
        tracing::debug!(count = configs.len(), "fleet loaded");

        Ok(Self {
            settings,
            platform,
            identity,
            store,
            configs,
            running: HashMap::new(),
            states,
            launched_serials: HashMap::new(),
            generations,
            teardown,
            restore_failures: Vec::new(),
            in_flight: None,
            events,
            terminations,
            pump,
            subscription,
        })
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    #[must_use]
    pub fn settings(&self) -> &FleetSettings { &self.settings }

    /// Configs in persisted order.
    #[must_use]
    pub fn configs(&self) -> &[DisplayConfig] { &self.configs }

    #[must_use]
    pub fn config(&self, id: ConfigId) -> Option<&DisplayConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn is_running(&self, id: ConfigId) -> bool { self.running.contains_key(&id) }

    /// Ids of running displays, in persisted order.
    #[must_use]
    pub fn running_ids(&self) -> Vec<ConfigId> {
        self.configs.iter().map(|c| c.id).filter(|id| self.is_running(*id)).collect()
    }

    #[must_use]
    pub fn runtime_info(&self, id: ConfigId) -> Option<RuntimeInfo> {
        self.running.get(&id).map(|running| running.info(id))
    }

    #[must_use]
    pub fn display_state(&self, id: ConfigId) -> Option<DisplayState> { self.states.get(&id).copied() }

    #[must_use]
    pub fn generation(&self, id: ConfigId) -> Option<Generation> { self.generations.current(id) }

    /// Failures recorded by the last [`restore`](Self::restore) pass.
    #[must_use]
    pub fn restore_failures(&self) -> &[RestoreFailure] { &self.restore_failures }

    /// Status of every config, in persisted order.
    #[must_use]
    pub fn statuses(&self) -> Vec<DisplayStatus> {
        self.configs
            .iter()
            .map(|config| DisplayStatus {
                config: config.clone(),
                state: self.display_state(config.id).unwrap_or_default(),
                runtime: self.runtime_info(config.id),
            })
            .collect()
    }

    /// A single topology sample.
    #[must_use]
    pub fn topology(&self) -> Option<TopologySnapshot> { self.teardown.snapshot() }

    // ========================================================================
    // OS event intake
    // ========================================================================

    /// Waits for the next termination redelivered from the OS.
    pub async fn recv_termination(&mut self) -> Option<Termination> { self.terminations.recv().await }

    /// Applies every termination that has already been redelivered.
    pub fn drain_terminations(&mut self) {
        while let Ok(termination) = self.terminations.try_recv() {
            self.on_display_terminated(termination);
        }
    }

    /// Applies a termination reported by the OS.
    ///
    /// Only a termination of the current generation of a running display
    /// changes state: the display silently returns to `Disabled` and
    /// `desired_enabled` is left alone so the next restore retries it.
    pub fn on_display_terminated(&mut self, termination: Termination) {
        let Termination { config_id, generation } = termination;
        let current = self.running.get(&config_id).map(|running| running.generation);

        if current != Some(generation) {
            tracing::trace!(%config_id, generation, ?current, "ignoring stale termination");
            return;
        }

        self.running.remove(&config_id);
        self.set_state(config_id, DisplayState::Disabled);
        tracing::info!(%config_id, generation, "display terminated by the system");
    }

    /// Undoes what a cancelled command left behind.
    ///
    /// A display the command was bringing up is rolled back; a config it was
    /// creating is removed and the removal persisted. Every other config then
    /// settles to `Running` or `Disabled`.
    pub async fn abandon_interrupted(&mut self) {
        match self.in_flight.take() {
            Some(InFlight::BringUp(id)) => {
                self.roll_back(id).await;
                self.set_state(id, DisplayState::Disabled);
            }
            Some(InFlight::Create(id)) => {
                self.roll_back(id).await;
                self.configs.retain(|c| c.id != id);
                self.states.remove(&id);
                if let Err(err) = self.persist() {
                    tracing::error!(config_id = %id, error = %err, "failed to remove cancelled config");
                }
                tracing::info!(config_id = %id, "cancelled create removed");
            }
            None => {}
        }
        self.settle_interrupted();
    }

    /// Resolves states left behind by an interrupted operation.
    ///
    /// A config with a live handle is `Running`, any other is `Disabled`.
    pub fn settle_interrupted(&mut self) {
        let ids: Vec<ConfigId> = self.states.keys().copied().collect();
        for id in ids {
            let state = if self.is_running(id) { DisplayState::Running } else { DisplayState::Disabled };
            if self.states.get(&id) != Some(&state) {
                tracing::debug!(config_id = %id, %state, "settling interrupted state");
                self.states.insert(id, state);
            }
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Marks `scope` as in flight unless an outer command already did.
    ///
    /// Returns `true` if the caller owns the mark and must clear it.
    fn begin_in_flight(&mut self, scope: InFlight) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(scope);
        true
    }

    fn end_in_flight(&mut self, owned: bool) {
        if owned {
            self.in_flight = None;
        }
    }

    fn index_of(&self, id: ConfigId) -> FleetResult<usize> {
        self.configs.iter().position(|c| c.id == id).ok_or(FleetError::ConfigNotFound(id))
    }

    fn persist(&self) -> FleetResult<()> {
        self.store.save(&self.configs).map_err(|err| {
            tracing::error!(error = %err, "failed to persist display list");
            FleetError::from(err)
        })
    }

    fn set_state(&mut self, id: ConfigId, state: DisplayState) {
        if self.states.insert(id, state) != Some(state) {
            tracing::trace!(config_id = %id, %state, "display state changed");
        }
    }

    /// Serials of every config that wants to be enabled.
    fn desired_serials(&self) -> HashSet<u32> {
        self.configs.iter().filter(|c| c.desired_enabled).map(|c| c.serial_num).collect()
    }

    fn descriptor(&self, config: &DisplayConfig) -> DisplayDescriptor {
        DisplayDescriptor {
            name: config.name.clone(),
            max_pixels: config.pixel_envelope(),
            physical_size: config.physical_size(),
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            serial: config.serial_num,
        }
    }

    /// Callback handed to the OS for one generation of a config.
    fn termination_callback(&self, config_id: ConfigId, generation: Generation) -> TerminationCallback {
        let events = self.events.clone();
        Box::new(move || {
            let _ = events.send(OsEvent::Terminated(Termination { config_id, generation }));
        })
    }
}

impl Drop for FleetManager {
    fn drop(&mut self) {
        if let Some(token) = self.subscription.take() {
            self.platform.inspector.unsubscribe(token);
        }
        self.pump.abort();
    }
}

impl std::fmt::Debug for FleetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetManager")
            .field("configs", &self.configs.len())
            .field("running", &self.running.len())
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}
