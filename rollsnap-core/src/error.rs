/*!
Error types for the Rollsnap core engine.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the Rollsnap core.
pub type Result<T> = std::result::Result<T, RotateError>;

/// Errors that can occur during a rotation run.
#[derive(Error, Debug)]
pub enum RotateError {
    /// Retention policy or run configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The create call itself failed
    #[error("Failed to create snapshot of {volume_id}: {reason}")]
    CreateFailed { volume_id: String, reason: String },

    /// The new snapshot came back in a state we cannot trust
    #[error("Snapshot {snapshot_id} state not pending or completed: {state}")]
    UnexpectedState { snapshot_id: String, state: String },

    /// Listing the snapshot series failed
    #[error("Failed to enumerate snapshots: {0}")]
    Enumeration(String),

    /// A delete call failed or was not acknowledged
    #[error("Failed to delete snapshot {snapshot_id}: {reason}")]
    DeletionFailed { snapshot_id: String, reason: String },

    /// Write freeze could not be acquired
    #[error("Failed to freeze {}: {reason}", path.display())]
    FreezeFailed { path: PathBuf, reason: String },

    /// Write freeze could not be released
    #[error("Failed to thaw {}: {reason}", path.display())]
    ThawFailed { path: PathBuf, reason: String },

    /// Errors reported by the snapshot service before the engine classifies them
    #[error("Snapshot service error: {0}")]
    Service(String),

    /// A snapshot returned by the service could not be interpreted
    #[error("Invalid snapshot record: {0}")]
    InvalidRecord(String),

    /// I/O errors (config files, subprocesses)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collaborator call gave up after retrying
    #[error(transparent)]
    Retry(#[from] rollsnap_retry::RetryError),
}

impl RotateError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new service error
    pub fn service<S: Into<String>>(msg: S) -> Self {
        Self::Service(msg.into())
    }

    /// Create a new enumeration error
    pub fn enumeration<S: Into<String>>(msg: S) -> Self {
        Self::Enumeration(msg.into())
    }

    /// Create a new invalid record error
    pub fn invalid_record<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// True for errors raised before any remote call was made
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
