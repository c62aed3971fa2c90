//! Handle for communicating with the fleet actor.
//!
//! `FleetHandle` is cheap to clone and can be shared across tasks. Long-running
//! commands return an [`Operation`], a future for the result that can also be
//! cancelled through a [`CancelHandle`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::messages::{CancelSignal, FleetMessage, FleetQuery, QueryResult, Reply};
use crate::modules::fleet::error::{ActorError, FleetError, FleetResult};
use crate::modules::fleet::manager::{CreateRequest, DisplayStatus};
use crate::modules::fleet::topology::TopologySnapshot;
use crate::modules::fleet::types::{
    ConfigId, ConfigUpdate, DisplayConfig, DisplayMode, DisplayState, MoveDirection,
    RestoreFailure, RuntimeInfo,
};

// ============================================================================
// Cancellation
// ============================================================================

/// Cancels one in-flight operation. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<Mutex<Option<oneshot::Sender<()>>>>);

impl CancelHandle {
    fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// Requests cancellation.
    ///
    /// Returns `false` if the operation was already cancelled or has finished.
    pub fn cancel(&self) -> bool { self.0.lock().take().is_some_and(|tx| tx.send(()).is_ok()) }
}

/// A command running on the fleet actor.
///
/// Awaiting it yields the command's result. Dropping it does not stop the
/// command; use [`cancel`](Self::cancel) for that.
#[derive(Debug)]
#[must_use = "the command keeps running; await it or cancel it"]
pub struct Operation<T> {
    reply: oneshot::Receiver<FleetResult<T>>,
    cancel: CancelHandle,
}

impl<T> Operation<T> {
    /// Handle that cancels this operation from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle { self.cancel.clone() }

    /// Requests cancellation. The operation then resolves to [`FleetError::Cancelled`].
    pub fn cancel(&self) -> bool { self.cancel.cancel() }
}

impl<T> Future for Operation<T> {
    type Output = FleetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err(FleetError::Actor(ActorError::ReceiveFailed))))
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle for communicating with the fleet actor.
#[derive(Clone, Debug)]
pub struct FleetHandle {
    sender: mpsc::Sender<FleetMessage>,
}

impl FleetHandle {
    pub(crate) const fn new(sender: mpsc::Sender<FleetMessage>) -> Self { Self { sender } }

    // ========================================================================
    // Raw sending
    // ========================================================================

    /// Sends a message without waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the channel is full or closed.
    pub fn send(&self, msg: FleetMessage) -> Result<(), ActorError> {
        self.sender.try_send(msg).map_err(|_| ActorError::SendFailed)
    }

    /// Sends a message, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the channel is closed.
    pub async fn send_async(&self, msg: FleetMessage) -> Result<(), ActorError> {
        self.sender.send(msg).await.map_err(|_| ActorError::SendFailed)
    }

    /// Asks the actor to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the actor has already stopped.
    pub async fn shutdown(&self) -> Result<(), ActorError> { self.send_async(FleetMessage::Shutdown).await }

    fn start<T>(
        &self,
        build: impl FnOnce(CancelSignal, Reply<T>) -> FleetMessage,
    ) -> Result<Operation<T>, ActorError> {
        let (cancel, signal) = CancelHandle::pair();
        let (tx, reply) = oneshot::channel();
        self.send(build(signal, tx))?;
        Ok(Operation { reply, cancel })
    }

    async fn command<T>(&self, build: impl FnOnce(Reply<T>) -> FleetMessage) -> FleetResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send_async(build(tx)).await?;
        rx.await.map_err(|_| ActorError::ReceiveFailed)?
    }

    // ========================================================================
    // Long-running commands
    // ========================================================================

    /// Creates, persists and enables a new display.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn create(&self, request: CreateRequest) -> Result<Operation<RuntimeInfo>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::Create { request, cancel, respond_to })
    }

    /// Enables a configured display.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn enable(&self, id: ConfigId) -> Result<Operation<RuntimeInfo>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::Enable { id, cancel, respond_to })
    }

    /// Recreates a running display.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn rebuild(&self, id: ConfigId) -> Result<Operation<RuntimeInfo>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::Rebuild { id, cancel, respond_to })
    }

    /// Replaces the mode list of a display. Resolves to `true` if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn apply_modes(&self, id: ConfigId, modes: Vec<DisplayMode>) -> Result<Operation<bool>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::ApplyModes { id, modes, cancel, respond_to })
    }

    /// Edits a display's identity fields. Resolves to `true` if anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn update_config(&self, id: ConfigId, update: ConfigUpdate) -> Result<Operation<bool>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::UpdateConfig { id, update, cancel, respond_to })
    }

    /// Re-enables every display that wants to be enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the command cannot be queued.
    pub fn restore(&self) -> Result<Operation<Vec<RestoreFailure>>, ActorError> {
        self.start(|cancel, respond_to| FleetMessage::Restore { cancel, respond_to })
    }

    // ========================================================================
    // Immediate commands
    // ========================================================================

    /// Disables a display.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`] or an actor communication error.
    pub async fn disable(&self, id: ConfigId) -> FleetResult<()> {
        self.command(|respond_to| FleetMessage::Disable { id, respond_to }).await
    }

    /// Removes a display from the fleet.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`], a storage error or an actor
    /// communication error.
    pub async fn destroy(&self, id: ConfigId) -> FleetResult<()> {
        self.command(|respond_to| FleetMessage::Destroy { id, respond_to }).await
    }

    /// Moves a display one slot up or down. Returns `false` at the boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::ConfigNotFound`], a storage error or an actor
    /// communication error.
    pub async fn move_config(&self, id: ConfigId, direction: MoveDirection) -> FleetResult<bool> {
        self.command(|respond_to| FleetMessage::Move { id, direction, respond_to }).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Executes a query and waits for the result.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::SendFailed`] if the channel is closed, or
    /// [`ActorError::ReceiveFailed`] if the response channel is closed.
    pub async fn query(&self, query: FleetQuery) -> Result<QueryResult, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.send_async(FleetMessage::Query { query, respond_to: tx }).await?;
        rx.await.map_err(|_| ActorError::ReceiveFailed)
    }

    /// Configs in persisted order.
    ///
    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn configs(&self) -> Result<Vec<DisplayConfig>, ActorError> {
        match self.query(FleetQuery::Configs).await? {
            QueryResult::Configs(configs) => Ok(configs),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// Status of every config, in persisted order.
    ///
    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn statuses(&self) -> Result<Vec<DisplayStatus>, ActorError> {
        match self.query(FleetQuery::Statuses).await? {
            QueryResult::Statuses(statuses) => Ok(statuses),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// Smallest serial no config and no online managed display uses.
    ///
    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn next_available_serial(&self) -> Result<u32, ActorError> {
        match self.query(FleetQuery::NextAvailableSerial).await? {
            QueryResult::Serial(serial) => Ok(serial),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn runtime_info(&self, id: ConfigId) -> Result<Option<RuntimeInfo>, ActorError> {
        match self.query(FleetQuery::RuntimeInfo { id }).await? {
            QueryResult::RuntimeInfo(info) => Ok(info),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn display_state(&self, id: ConfigId) -> Result<Option<DisplayState>, ActorError> {
        match self.query(FleetQuery::DisplayState { id }).await? {
            QueryResult::DisplayState(state) => Ok(state),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// Failures of the last restore pass.
    ///
    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn restore_failures(&self) -> Result<Vec<RestoreFailure>, ActorError> {
        match self.query(FleetQuery::RestoreFailures).await? {
            QueryResult::RestoreFailures(failures) => Ok(failures),
            _ => Err(ActorError::ReceiveFailed),
        }
    }

    /// # Errors
    ///
    /// Returns an error if communication with the actor fails.
    pub async fn topology(&self) -> Result<Option<TopologySnapshot>, ActorError> {
        match self.query(FleetQuery::Topology).await? {
            QueryResult::Topology(snapshot) => Ok(snapshot),
            _ => Err(ActorError::ReceiveFailed),
        }
    }
}
