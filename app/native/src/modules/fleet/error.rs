//! Error types for the virtual display fleet.
//!
//! # Error Categories
//!
//! - **Validation errors**: duplicate serials, invalid configuration
//! - **Lookup errors**: unknown config id
//! - **OS errors**: creation failures, teardown that never settles
//! - **Topology errors**: repair transactions failing, topology never settling
//! - **Storage errors**: the display list could not be read or written

use thiserror::Error;

use super::store::StoreError;
use super::types::ConfigId;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors surfaced by fleet operations.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Another config or an online managed display already uses this serial.
    #[error("serial number {0} is already in use")]
    DuplicateSerialNumber(u32),

    /// The requested configuration is not acceptable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The OS refused to create the display after all retry attempts.
    #[error("failed to create virtual display: {0}")]
    CreationFailed(String),

    /// No config with this id exists.
    #[error("display config {0} not found")]
    ConfigNotFound(ConfigId),

    /// Neither termination nor offline confirmation arrived in time.
    #[error("timed out waiting for display teardown")]
    TeardownTimedOut,

    /// The reconfiguration transaction could not be applied.
    #[error("topology repair failed: {0}")]
    TopologyRepairFailed(String),

    /// The display topology did not settle after enabling.
    #[error("display topology did not stabilize")]
    TopologyUnstableAfterEnable,

    /// The display list could not be persisted or loaded.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The operation was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The fleet actor could not be reached.
    #[error(transparent)]
    Actor(#[from] ActorError),
}

/// Error reported by a platform implementation of the OS contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OsError {
    /// Display creation was rejected.
    #[error("display creation rejected: {0}")]
    Create(String),

    /// Online displays could not be enumerated.
    #[error("display enumeration failed (error {0})")]
    Enumerate(i32),

    /// A reconfiguration step failed.
    #[error("reconfiguration failed: {0}")]
    Transaction(String),

    /// The topology-change subscription could not be registered.
    #[error("topology subscription failed: {0}")]
    Subscribe(String),
}

/// Error types for actor communication.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Failed to send message to actor.
    #[error("Failed to send message to fleet actor: channel closed")]
    SendFailed,

    /// Failed to receive response from actor.
    #[error("Failed to receive response from fleet actor: channel closed")]
    ReceiveFailed,
}
