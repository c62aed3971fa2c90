//! Fleet actor.
//!
//! The actor owns the [`FleetManager`] and processes commands one at a time,
//! so lifecycle operations never interleave. Between commands it applies
//! terminations redelivered from the OS; during a command they queue up and
//! are applied once the command finishes (stale ones are ignored then).
//!
//! Long-running commands race a cancel signal. A cancelled command resolves
//! to [`FleetError::Cancelled`] only after the display it was bringing up has
//! been rolled back (and, for a create, the new config removed again).

mod handle;
mod messages;

use std::future::Future;

pub use handle::{CancelHandle, FleetHandle, Operation};
pub use messages::{CancelSignal, FleetMessage, FleetQuery, QueryResult, Reply};
use tokio::sync::mpsc;

use super::error::{FleetError, FleetResult};
use super::manager::FleetManager;

/// Channel buffer size for the fleet actor.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// The actor that owns all fleet state.
pub struct FleetActor {
    manager: FleetManager,
    receiver: mpsc::Receiver<FleetMessage>,
}

/// Runs `op` unless `cancel` fires first.
async fn cancellable<T>(cancel: CancelSignal, op: impl Future<Output = FleetResult<T>>) -> FleetResult<T> {
    tokio::select! {
        biased;
        Ok(()) = cancel => Err(FleetError::Cancelled),
        result = op => result,
    }
}

fn respond<T>(respond_to: Reply<T>, result: FleetResult<T>) {
    if respond_to.send(result).is_err() {
        tracing::trace!("fleet: caller dropped before the reply was sent");
    }
}

impl FleetActor {
    /// Spawns the actor on the current tokio runtime.
    #[must_use]
    pub fn spawn(manager: FleetManager) -> FleetHandle {
        tracing::debug!("fleet: spawning actor");
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let actor = Self { manager, receiver };
        tokio::spawn(actor.run());
        FleetHandle::new(sender)
    }

    async fn run(mut self) {
        tracing::trace!("fleet: actor message loop starting");

        loop {
            tokio::select! {
                biased;
                Some(termination) = self.manager.recv_termination() => {
                    self.manager.on_display_terminated(termination);
                }
                msg = self.receiver.recv() => match msg {
                    Some(FleetMessage::Shutdown) => {
                        tracing::debug!("fleet: actor received shutdown message");
                        break;
                    }
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        tracing::debug!("fleet: actor channel closed, exiting");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_message(&mut self, msg: FleetMessage) {
        tracing::trace!(message = msg.name(), "fleet: handling message");

        match msg {
            FleetMessage::Create { request, cancel, respond_to } => {
                let result = cancellable(cancel, self.manager.create(request)).await;
                self.finish(respond_to, result).await;
            }
            FleetMessage::Enable { id, cancel, respond_to } => {
                let result = cancellable(cancel, self.manager.enable(id)).await;
                self.finish(respond_to, result).await;
            }
            FleetMessage::Rebuild { id, cancel, respond_to } => {
                let result = cancellable(cancel, self.manager.rebuild(id)).await;
                self.finish(respond_to, result).await;
            }
            FleetMessage::ApplyModes { id, modes, cancel, respond_to } => {
                let result = cancellable(cancel, self.manager.apply_modes(id, modes)).await;
                self.finish(respond_to, result).await;
            }
            FleetMessage::UpdateConfig { id, update, cancel, respond_to } => {
                let result = cancellable(cancel, self.manager.update_config(id, update)).await;
                self.finish(respond_to, result).await;
            }
            FleetMessage::Restore { cancel, respond_to } => {
                let manager = &mut self.manager;
                let result = cancellable(cancel, async move { Ok(manager.restore().await) }).await;
                self.finish(respond_to, result).await;
            }

            FleetMessage::Disable { id, respond_to } => respond(respond_to, self.manager.disable(id)),
            FleetMessage::Destroy { id, respond_to } => respond(respond_to, self.manager.destroy(id)),
            FleetMessage::Move { id, direction, respond_to } => {
                respond(respond_to, self.manager.move_config(id, direction));
            }

            FleetMessage::Query { query, respond_to } => {
                if respond_to.send(self.answer(query)).is_err() {
                    tracing::trace!("fleet: query caller dropped");
                }
            }

            // Handled by the run loop
            FleetMessage::Shutdown => {}
        }
    }

    /// Replies to a long-running command, undoing it first if it was cancelled.
    async fn finish<T>(&mut self, respond_to: Reply<T>, result: FleetResult<T>) {
        if matches!(result, Err(FleetError::Cancelled)) {
            tracing::info!("fleet: operation cancelled");
            self.manager.abandon_interrupted().await;
        }
        self.manager.drain_terminations();
        respond(respond_to, result);
    }

    fn answer(&self, query: FleetQuery) -> QueryResult {
        match query {
            FleetQuery::Configs => QueryResult::Configs(self.manager.configs().to_vec()),
            FleetQuery::Statuses => QueryResult::Statuses(self.manager.statuses()),
            FleetQuery::NextAvailableSerial => QueryResult::Serial(self.manager.next_available_serial()),
            FleetQuery::RuntimeInfo { id } => QueryResult::RuntimeInfo(self.manager.runtime_info(id)),
            FleetQuery::DisplayState { id } => QueryResult::DisplayState(self.manager.display_state(id)),
            FleetQuery::RestoreFailures => QueryResult::RestoreFailures(self.manager.restore_failures().to_vec()),
            FleetQuery::Topology => QueryResult::Topology(self.manager.topology()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::FleetSettings;
    use crate::modules::fleet::manager::CreateRequest;
    use crate::modules::fleet::sim::SimulatedOs;
    use crate::modules::fleet::store::MemoryConfigStore;
    use crate::modules::fleet::types::{DEFAULT_MODE, DisplayState, PhysicalSize, PixelSize};

    fn request(serial: u32) -> CreateRequest {
        CreateRequest {
            name: format!("Display {serial}"),
            serial_num: serial,
            physical_size: PhysicalSize::new(600, 340),
            max_pixels: PixelSize::new(3840, 2160),
            modes: vec![DEFAULT_MODE],
        }
    }

    fn spawn(os: &SimulatedOs, store: &MemoryConfigStore) -> FleetHandle {
        let manager =
            FleetManager::new(FleetSettings::default(), os.platform(), Box::new(store.clone())).unwrap();
        FleetActor::spawn(manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_through_handle() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let fleet = spawn(&os, &store);

        let info = fleet.create(request(1)).unwrap().await.unwrap();

        assert_eq!(fleet.display_state(info.config_id).await.unwrap(), Some(DisplayState::Running));
        assert_eq!(fleet.configs().await.unwrap().len(), 1);
        assert_eq!(fleet.next_available_serial().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_termination_disables_without_changing_desire() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let fleet = spawn(&os, &store);
        let info = fleet.create(request(1)).unwrap().await.unwrap();

        assert!(os.terminate_display(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fleet.display_state(info.config_id).await.unwrap(), Some(DisplayState::Disabled));
        assert_eq!(fleet.runtime_info(info.config_id).await.unwrap(), None);
        assert!(fleet.configs().await.unwrap()[0].desired_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_create_leaves_nothing_behind() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let fleet = spawn(&os, &store);
        os.set_oscillate_main(true);

        let operation = fleet.create(request(1)).unwrap();
        let cancel = operation.cancel_handle();
        let waiter = tokio::spawn(operation);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cancel.cancel());

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(FleetError::Cancelled)));
        assert!(fleet.statuses().await.unwrap().is_empty());
        assert!(store.snapshot().is_empty());
        assert!(os.online_managed_serials().is_empty());
        assert!(!cancel.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_enable_rolls_back_display() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let fleet = spawn(&os, &store);
        let info = fleet.create(request(1)).unwrap().await.unwrap();
        fleet.disable(info.config_id).await.unwrap();
        os.set_oscillate_main(true);

        let operation = fleet.enable(info.config_id).unwrap();
        let cancel = operation.cancel_handle();
        let waiter = tokio::spawn(operation);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cancel.cancel());

        assert!(matches!(waiter.await.unwrap(), Err(FleetError::Cancelled)));
        assert_eq!(fleet.runtime_info(info.config_id).await.unwrap(), None);
        assert_eq!(fleet.display_state(info.config_id).await.unwrap(), Some(DisplayState::Disabled));
        assert!(os.online_managed_serials().is_empty());
        // The config survives and still wants to be enabled.
        assert!(store.snapshot()[0].desired_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_shutdown_fail() {
        let os = SimulatedOs::default();
        let store = MemoryConfigStore::default();
        let fleet = spawn(&os, &store);

        fleet.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(fleet.configs().await.is_err());
        assert!(matches!(
            fleet.destroy(uuid::Uuid::now_v7()).await,
            Err(FleetError::Actor(_))
        ));
    }
}
