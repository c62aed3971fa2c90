//! Teardown settlement.
//!
//! Releasing a managed display is confirmed through two independent and
//! unreliable channels:
//!
//! - the OS termination callback, which may arrive late, twice for an older
//!   generation, or never at all
//! - the display disappearing from the online topology, observed through
//!   topology-change events or, if those could not be subscribed, polling
//!
//! [`TeardownCoordinator::settle_teardown`] races both and resolves as soon as
//! either confirms. Waiters are keyed by config id and generation so a late
//! event from an earlier display can never satisfy a wait for a newer one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::{Instant, sleep};

use super::error::{FleetError, FleetResult};
use super::os::{ManagedIdentity, OsEvent, Termination, TopologyInspector};
use super::topology::TopologySnapshot;
use super::types::{ConfigId, Generation};

// ============================================================================
// Generation Table
// ============================================================================

/// Current generation per config.
///
/// Only the fleet manager bumps generations; the coordinator reads them to
/// recognise waits that a newer display has already superseded.
#[derive(Debug, Default)]
pub struct GenerationTable {
    inner: RwLock<HashMap<ConfigId, Generation>>,
}

impl GenerationTable {
    #[must_use]
    pub fn current(&self, config_id: ConfigId) -> Option<Generation> {
        self.inner.read().get(&config_id).copied()
    }

    /// Advances the generation of `config_id` and returns the new value.
    pub(crate) fn bump(&self, config_id: ConfigId) -> Generation {
        let mut inner = self.inner.write();
        let generation = inner.entry(config_id).or_insert(0);
        *generation += 1;
        *generation
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// How a teardown was confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The termination callback fired for the expected generation.
    Confirmed,
    /// The display went offline but the callback never arrived.
    OfflineOnly,
}

struct PendingWaiter {
    ticket: u64,
    generation: Generation,
    respond_to: oneshot::Sender<bool>,
}

#[derive(Default)]
struct TerminationRegistry {
    /// Highest generation whose termination has been observed.
    confirmed: HashMap<ConfigId, Generation>,
    /// At most one waiter per config.
    waiters: HashMap<ConfigId, PendingWaiter>,
    next_ticket: u64,
}

/// Removes a waiter when its wait ends or is cancelled.
struct WaiterGuard<'a> {
    coordinator: &'a TeardownCoordinator,
    config_id: ConfigId,
    ticket: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut registry = self.coordinator.registry.lock();
        if registry.waiters.get(&self.config_id).is_some_and(|w| w.ticket == self.ticket) {
            registry.waiters.remove(&self.config_id);
        }
    }
}

/// Arbitrates teardown confirmation for every managed display.
pub struct TeardownCoordinator {
    inspector: Arc<dyn TopologyInspector>,
    identity: ManagedIdentity,
    generations: Arc<GenerationTable>,
    registry: Mutex<TerminationRegistry>,
    topology_changed: Notify,
    event_driven: AtomicBool,
    /// Safety poll while topology events are subscribed.
    event_poll_interval: Duration,
    /// Poll interval when no topology events arrive.
    fallback_poll_interval: Duration,
}

impl TeardownCoordinator {
    #[must_use]
    pub fn new(
        inspector: Arc<dyn TopologyInspector>,
        identity: ManagedIdentity,
        generations: Arc<GenerationTable>,
        event_poll_interval: Duration,
        fallback_poll_interval: Duration,
    ) -> Self {
        Self {
            inspector,
            identity,
            generations,
            registry: Mutex::new(TerminationRegistry::default()),
            topology_changed: Notify::new(),
            event_driven: AtomicBool::new(false),
            event_poll_interval,
            fallback_poll_interval,
        }
    }

    /// Records whether topology-change events are being delivered.
    pub fn set_event_driven(&self, event_driven: bool) {
        self.event_driven.store(event_driven, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_event_driven(&self) -> bool { self.event_driven.load(Ordering::SeqCst) }

    /// Takes a single topology sample.
    #[must_use]
    pub fn snapshot(&self) -> Option<TopologySnapshot> {
        match self.inspector.enumerate_online_displays() {
            Ok(enumeration) => Some(TopologySnapshot::from_enumeration(enumeration, self.identity)),
            Err(err) => {
                tracing::debug!(error = %err, "topology sample failed");
                None
            }
        }
    }

    // ========================================================================
    // Event intake
    // ========================================================================

    /// Records a termination and wakes the matching waiter, if any.
    pub fn on_terminated(&self, termination: Termination) {
        let Termination { config_id, generation } = termination;
        let mut registry = self.registry.lock();

        let confirmed = registry.confirmed.entry(config_id).or_insert(0);
        *confirmed = (*confirmed).max(generation);

        let wakes = registry.waiters.get(&config_id).is_some_and(|w| w.generation <= generation);
        if wakes && let Some(waiter) = registry.waiters.remove(&config_id) {
            tracing::debug!(%config_id, generation, "termination observed by waiter");
            let _ = waiter.respond_to.send(true);
        }
    }

    /// Wakes every offline waiter so it re-samples the topology.
    pub fn on_topology_changed(&self) { self.topology_changed.notify_waiters(); }

    /// Whether the termination of `generation` (or a later one) has been observed.
    #[must_use]
    pub fn termination_confirmed(&self, config_id: ConfigId, generation: Generation) -> bool {
        self.registry.lock().confirmed.get(&config_id).is_some_and(|g| *g >= generation)
    }

    /// Whether the latest display of this config may still be alive.
    #[must_use]
    pub fn teardown_pending(&self, config_id: ConfigId) -> bool {
        self.generations
            .current(config_id)
            .is_some_and(|generation| !self.termination_confirmed(config_id, generation))
    }

    fn termination_satisfied(&self, config_id: ConfigId, expected: Generation) -> bool {
        self.termination_confirmed(config_id, expected)
            || self.generations.current(config_id).is_some_and(|current| current > expected)
    }

    #[cfg(test)]
    fn pending_waiters(&self) -> usize { self.registry.lock().waiters.len() }

    // ========================================================================
    // Waiting primitives
    // ========================================================================

    /// Waits for the termination callback of `expected` generation.
    ///
    /// Registering replaces (and resolves as `false`) any earlier waiter for the
    /// same config. The wait is already satisfied if the generation has moved
    /// past `expected`.
    pub async fn wait_for_termination(
        &self,
        config_id: ConfigId,
        expected: Generation,
        timeout: Duration,
    ) -> bool {
        if self.termination_satisfied(config_id, expected) {
            return true;
        }

        let (respond_to, response) = oneshot::channel();
        let ticket = {
            let mut registry = self.registry.lock();
            registry.next_ticket += 1;
            let ticket = registry.next_ticket;
            let waiter = PendingWaiter { ticket, generation: expected, respond_to };
            if let Some(previous) = registry.waiters.insert(config_id, waiter) {
                tracing::debug!(%config_id, "superseding pending termination waiter");
                let _ = previous.respond_to.send(false);
            }
            ticket
        };
        let _guard = WaiterGuard { coordinator: self, config_id, ticket };

        if self.termination_satisfied(config_id, expected) {
            return true;
        }

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false) | Err(_)) | Err(_) => self.termination_satisfied(config_id, expected),
        }
    }

    /// Waits until no managed display with `serial` is online.
    pub async fn wait_for_offline(&self, serial: u32, timeout: Duration) -> bool {
        self.wait_for_all_offline(&[serial], timeout).await.is_ok()
    }

    /// Waits until every serial in `serials` is offline, as one gate.
    ///
    /// # Errors
    ///
    /// Returns the serials still online when the timeout elapses.
    pub async fn wait_for_all_offline(&self, serials: &[u32], timeout: Duration) -> Result<(), Vec<u32>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.topology_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let online = self.online_serials(serials);
            if online.as_ref().is_some_and(Vec::is_empty) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                let remaining = online.unwrap_or_else(|| serials.to_vec());
                tracing::debug!(?remaining, "displays still online at offline deadline");
                return Err(remaining);
            }

            let poll = if self.is_event_driven() {
                self.event_poll_interval
            } else {
                self.fallback_poll_interval
            };
            tokio::select! {
                () = &mut notified => {}
                () = sleep(poll.min(deadline - now)) => {}
            }
        }
    }

    /// Serials from `serials` currently online, or `None` if the sample failed.
    fn online_serials(&self, serials: &[u32]) -> Option<Vec<u32>> {
        let snapshot = self.snapshot()?;
        Some(
            serials
                .iter()
                .copied()
                .filter(|serial| snapshot.managed_with_serial(*serial).is_some())
                .collect(),
        )
    }

    /// Races termination against offline confirmation.
    ///
    /// Whichever confirms first wins and the other wait is dropped. A failed
    /// termination wait is not fatal while the offline wait is still running,
    /// since some OS paths never fire the callback.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::TeardownTimedOut`] if both waits time out.
    pub async fn settle_teardown(
        &self,
        config_id: ConfigId,
        generation: Generation,
        serial: u32,
        termination_timeout: Duration,
        offline_timeout: Duration,
    ) -> FleetResult<TeardownOutcome> {
        let termination = self.wait_for_termination(config_id, generation, termination_timeout);
        let offline = self.wait_for_offline(serial, offline_timeout);
        tokio::pin!(termination, offline);

        let mut termination_done = false;
        let mut offline_done = false;
        loop {
            tokio::select! {
                confirmed = &mut termination, if !termination_done => {
                    if confirmed {
                        tracing::debug!(%config_id, generation, "teardown confirmed by termination");
                        return Ok(TeardownOutcome::Confirmed);
                    }
                    termination_done = true;
                }
                gone = &mut offline, if !offline_done => {
                    if gone {
                        tracing::debug!(%config_id, serial, "teardown confirmed by offline check only");
                        return Ok(TeardownOutcome::OfflineOnly);
                    }
                    offline_done = true;
                }
            }

            if termination_done && offline_done {
                tracing::warn!(%config_id, generation, serial, "teardown did not settle");
                return Err(FleetError::TeardownTimedOut);
            }
        }
    }
}

impl std::fmt::Debug for TeardownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownCoordinator")
            .field("identity", &self.identity)
            .field("event_driven", &self.is_event_driven())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Event Pump
// ============================================================================

/// Redelivers OS callbacks onto the fleet's executor.
///
/// Termination events resolve teardown waiters immediately and are then
/// forwarded to the fleet, which applies the state transition itself.
pub async fn run_event_pump(
    coordinator: Arc<TeardownCoordinator>,
    mut events: mpsc::UnboundedReceiver<OsEvent>,
    fleet: mpsc::UnboundedSender<Termination>,
) {
    while let Some(event) = events.recv().await {
        match event {
            OsEvent::Terminated(termination) => {
                coordinator.on_terminated(termination);
                if fleet.send(termination).is_err() {
                    tracing::trace!("fleet gone, dropping termination event");
                }
            }
            OsEvent::TopologyChanged => coordinator.on_topology_changed(),
        }
    }
    tracing::trace!("event pump stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::modules::fleet::os::{
        DisplayEnumeration, RawDisplay, SubscriptionToken, TopologyCallback,
    };
    use crate::modules::fleet::error::OsError;
    use crate::modules::fleet::topology::Bounds;

    const IDENTITY: ManagedIdentity = ManagedIdentity { vendor_id: 1, product_id: 2 };

    /// Inspector whose online serials are set directly by the test.
    #[derive(Default)]
    struct FakeInspector {
        online: Mutex<Vec<u32>>,
    }

    impl TopologyInspector for FakeInspector {
        fn enumerate_online_displays(&self) -> Result<DisplayEnumeration, OsError> {
            let displays = self
                .online
                .lock()
                .iter()
                .map(|serial| RawDisplay {
                    id: *serial + 100,
                    vendor_id: 1,
                    product_id: 2,
                    serial: *serial,
                    is_active: true,
                    is_mirror: false,
                    mirror_master_id: None,
                    bounds: Bounds::new(0, 0, 1920, 1080),
                })
                .collect();
            Ok(DisplayEnumeration { displays, main_display_id: None })
        }

        fn subscribe(&self, _on_change: TopologyCallback) -> Result<SubscriptionToken, OsError> {
            Err(OsError::Subscribe("unsupported".to_string()))
        }

        fn unsubscribe(&self, _token: SubscriptionToken) {}
    }

    fn coordinator(online: &[u32]) -> (Arc<TeardownCoordinator>, Arc<FakeInspector>, Arc<GenerationTable>) {
        let inspector = Arc::new(FakeInspector { online: Mutex::new(online.to_vec()) });
        let generations = Arc::new(GenerationTable::default());
        let coordinator = Arc::new(TeardownCoordinator::new(
            inspector.clone(),
            IDENTITY,
            generations.clone(),
            Duration::from_millis(500),
            Duration::from_millis(100),
        ));
        (coordinator, inspector, generations)
    }

    fn take_offline(inspector: &Arc<FakeInspector>, serial: u32, after: Duration) {
        let inspector = inspector.clone();
        tokio::spawn(async move {
            sleep(after).await;
            inspector.online.lock().retain(|s| *s != serial);
        });
    }

    fn terminate_after(coordinator: &Arc<TeardownCoordinator>, termination: Termination, after: Duration) {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            sleep(after).await;
            coordinator.on_terminated(termination);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_resolves_on_termination_without_waiting_for_offline() {
        let (coordinator, _inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);
        terminate_after(&coordinator, Termination { config_id: id, generation }, Duration::from_millis(30));

        let started = Instant::now();
        let outcome = coordinator
            .settle_teardown(id, generation, 5, Duration::from_secs(2), Duration::from_secs(8))
            .await
            .unwrap();

        assert_eq!(outcome, TeardownOutcome::Confirmed);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_resolves_on_offline_without_waiting_for_termination() {
        let (coordinator, inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);
        take_offline(&inspector, 5, Duration::from_millis(250));

        let started = Instant::now();
        let outcome = coordinator
            .settle_teardown(id, generation, 5, Duration::from_secs(2), Duration::from_secs(8))
            .await
            .unwrap();

        assert_eq!(outcome, TeardownOutcome::OfflineOnly);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_survives_termination_timeout_until_offline() {
        let (coordinator, inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);
        take_offline(&inspector, 5, Duration::from_secs(4));

        let outcome = coordinator
            .settle_teardown(id, generation, 5, Duration::from_secs(2), Duration::from_secs(8))
            .await
            .unwrap();
        assert_eq!(outcome, TeardownOutcome::OfflineOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_out_when_both_fail() {
        let (coordinator, _inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);

        let result = coordinator
            .settle_teardown(id, generation, 5, Duration::from_secs(2), Duration::from_secs(8))
            .await;
        assert!(matches!(result, Err(FleetError::TeardownTimedOut)));
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_termination_does_not_satisfy_newer_generation() {
        let (coordinator, _inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let old = generations.bump(id);
        let new = generations.bump(id);
        terminate_after(&coordinator, Termination { config_id: id, generation: old }, Duration::from_millis(10));

        let confirmed = coordinator.wait_for_termination(id, new, Duration::from_millis(200)).await;
        assert!(!confirmed);
        assert!(coordinator.termination_confirmed(id, old));
        assert!(!coordinator.termination_confirmed(id, new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_satisfied_when_generation_already_advanced() {
        let (coordinator, _inspector, generations) = coordinator(&[]);
        let id = Uuid::now_v7();
        let old = generations.bump(id);
        generations.bump(id);

        assert!(coordinator.wait_for_termination(id, old, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_waiter_resolves_previous_as_false() {
        let (coordinator, _inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.wait_for_termination(id, generation, Duration::from_secs(10)).await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(coordinator.pending_waiters(), 1);

        let started = Instant::now();
        let second = coordinator.wait_for_termination(id, generation, Duration::from_millis(100)).await;

        assert!(!first.await.unwrap());
        assert!(!second);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_removes_its_waiter() {
        let (coordinator, _inspector, generations) = coordinator(&[5]);
        let id = Uuid::now_v7();
        let generation = generations.bump(id);

        let wait = coordinator.wait_for_termination(id, generation, Duration::from_secs(10));
        let result = tokio::time::timeout(Duration::from_millis(10), wait).await;

        assert!(result.is_err());
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_offline_gate_reports_stragglers() {
        let (coordinator, inspector, _generations) = coordinator(&[1, 2, 3]);
        take_offline(&inspector, 1, Duration::from_millis(100));
        take_offline(&inspector, 2, Duration::from_millis(200));

        let result = coordinator.wait_for_all_offline(&[1, 2, 3], Duration::from_secs(1)).await;
        assert_eq!(result, Err(vec![3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_pump_forwards_terminations() {
        let (coordinator, _inspector, generations) = coordinator(&[]);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (fleet_tx, mut fleet_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_event_pump(coordinator.clone(), events_rx, fleet_tx));

        let id = Uuid::now_v7();
        let generation = generations.bump(id);
        let termination = Termination { config_id: id, generation };
        events_tx.send(OsEvent::Terminated(termination)).unwrap();

        assert_eq!(fleet_rx.recv().await, Some(termination));
        assert!(coordinator.termination_confirmed(id, generation));
    }
}
