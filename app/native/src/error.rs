//! Error types for Mirage.
//!
//! `MirageError` is the top-level error the CLI reports. Fleet operations have
//! their own [`FleetError`](crate::modules::fleet::FleetError) which converts
//! into it.

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::modules::fleet::FleetError;
use crate::modules::fleet::error::ActorError;
use crate::modules::fleet::store::StoreError;

/// Errors that can occur during application execution.
///
/// Serializable so `--json` output can report failures in a structured way.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum MirageError {
    /// Invalid command arguments.
    #[error("{0}")]
    InvalidArguments(String),
    /// Settings file error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// The display list could not be read or written.
    #[error("Store error: {0}")]
    StoreError(String),
    /// A fleet operation failed.
    #[error("Fleet error: {0}")]
    FleetError(String),
    /// IO error.
    #[error("IO error: {0}")]
    IoError(String),
    /// Generic command error.
    #[error("{0}")]
    CommandError(String),
}

impl From<std::io::Error> for MirageError {
    fn from(err: std::io::Error) -> Self { Self::IoError(err.to_string()) }
}

impl From<serde_json::Error> for MirageError {
    fn from(err: serde_json::Error) -> Self { Self::CommandError(err.to_string()) }
}

impl From<ConfigError> for MirageError {
    fn from(err: ConfigError) -> Self { Self::ConfigError(err.to_string()) }
}

impl From<StoreError> for MirageError {
    fn from(err: StoreError) -> Self { Self::StoreError(err.to_string()) }
}

impl From<FleetError> for MirageError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::Storage(err) => err.into(),
            other => Self::FleetError(other.to_string()),
        }
    }
}

impl From<ActorError> for MirageError {
    fn from(err: ActorError) -> Self { Self::FleetError(err.to_string()) }
}

impl From<String> for MirageError {
    fn from(msg: String) -> Self { Self::CommandError(msg) }
}

impl From<&str> for MirageError {
    fn from(msg: &str) -> Self { Self::CommandError(msg.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_arguments_display() {
        let err = MirageError::InvalidArguments("unknown display 'Desk'".to_string());
        assert_eq!(err.to_string(), "unknown display 'Desk'");
    }

    #[test]
    fn test_fleet_error_conversion() {
        let err: MirageError = FleetError::DuplicateSerialNumber(4).into();
        assert!(matches!(err, MirageError::FleetError(_)));
        assert!(err.to_string().contains("serial number 4"));
    }

    #[test]
    fn test_storage_fleet_error_becomes_store_error() {
        let err: MirageError = FleetError::Storage(StoreError::UnsupportedVersion(7)).into();
        assert!(matches!(err, MirageError::StoreError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MirageError = io_err.into();
        assert!(matches!(err, MirageError::IoError(_)));
    }

    #[test]
    fn test_error_serialization() {
        let err = MirageError::ConfigError("bad value".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"kind":"ConfigError","message":"bad value"}"#);
    }
}
