//! Message types for the fleet actor.
//!
//! - `FleetMessage` - commands sent to the actor
//! - `FleetQuery` - requests for fleet data (with response channel)
//! - `QueryResult` - responses from queries

use tokio::sync::oneshot;

use crate::modules::fleet::error::FleetResult;
use crate::modules::fleet::manager::{CreateRequest, DisplayStatus};
use crate::modules::fleet::topology::TopologySnapshot;
use crate::modules::fleet::types::{
    ConfigId, ConfigUpdate, DisplayConfig, DisplayMode, DisplayState, MoveDirection,
    RestoreFailure, RuntimeInfo,
};

/// Reply channel of a command.
pub type Reply<T> = oneshot::Sender<FleetResult<T>>;

/// Fires when the caller cancels a long-running command.
pub type CancelSignal = oneshot::Receiver<()>;

// ============================================================================
// Fleet Messages
// ============================================================================

/// Messages sent to the fleet actor.
#[derive(Debug)]
pub enum FleetMessage {
    // ════════════════════════════════════════════════════════════════════════
    // Long-running commands (cancellable)
    // ════════════════════════════════════════════════════════════════════════
    /// Create, persist and enable a new display.
    Create {
        request: CreateRequest,
        cancel: CancelSignal,
        respond_to: Reply<RuntimeInfo>,
    },

    /// Bring a configured display up.
    Enable {
        id: ConfigId,
        cancel: CancelSignal,
        respond_to: Reply<RuntimeInfo>,
    },

    /// Recreate a running display.
    Rebuild {
        id: ConfigId,
        cancel: CancelSignal,
        respond_to: Reply<RuntimeInfo>,
    },

    /// Replace the mode list of a display.
    ApplyModes {
        id: ConfigId,
        modes: Vec<DisplayMode>,
        cancel: CancelSignal,
        respond_to: Reply<bool>,
    },

    /// Edit name, serial or physical size.
    UpdateConfig {
        id: ConfigId,
        update: ConfigUpdate,
        cancel: CancelSignal,
        respond_to: Reply<bool>,
    },

    /// Re-enable every display that wants to be enabled.
    Restore {
        cancel: CancelSignal,
        respond_to: Reply<Vec<RestoreFailure>>,
    },

    // ════════════════════════════════════════════════════════════════════════
    // Immediate commands
    // ════════════════════════════════════════════════════════════════════════
    /// Tear a display down and stop wanting it.
    Disable { id: ConfigId, respond_to: Reply<()> },

    /// Remove a display from the fleet.
    Destroy { id: ConfigId, respond_to: Reply<()> },

    /// Reorder a display.
    Move {
        id: ConfigId,
        direction: MoveDirection,
        respond_to: Reply<bool>,
    },

    // ════════════════════════════════════════════════════════════════════════
    // Queries
    // ════════════════════════════════════════════════════════════════════════
    /// Read fleet state.
    Query {
        query: FleetQuery,
        respond_to: oneshot::Sender<QueryResult>,
    },

    /// Stop the actor. Running displays are torn down with the manager.
    Shutdown,
}

impl FleetMessage {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Enable { .. } => "enable",
            Self::Rebuild { .. } => "rebuild",
            Self::ApplyModes { .. } => "apply_modes",
            Self::UpdateConfig { .. } => "update_config",
            Self::Restore { .. } => "restore",
            Self::Disable { .. } => "disable",
            Self::Destroy { .. } => "destroy",
            Self::Move { .. } => "move",
            Self::Query { .. } => "query",
            Self::Shutdown => "shutdown",
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Queries for reading fleet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetQuery {
    Configs,
    Statuses,
    NextAvailableSerial,
    RuntimeInfo { id: ConfigId },
    DisplayState { id: ConfigId },
    RestoreFailures,
    Topology,
}

/// Results from fleet queries.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Configs(Vec<DisplayConfig>),
    Statuses(Vec<DisplayStatus>),
    Serial(u32),
    RuntimeInfo(Option<RuntimeInfo>),
    DisplayState(Option<DisplayState>),
    RestoreFailures(Vec<RestoreFailure>),
    Topology(Option<TopologySnapshot>),
}
