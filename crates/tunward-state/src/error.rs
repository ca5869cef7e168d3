//! Error types for tunward state persistence.

use thiserror::Error;

/// Result type alias for state file operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or writing state files.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("atomic replace failed: {0}")]
    Persist(String),
}
