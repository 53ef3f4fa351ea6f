//! Error types for the slotswap state store and lock.

use std::path::PathBuf;

use slotswap_core::Slot;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("database {0} is held open by another process")]
    Busy(PathBuf),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("active slot for {app} is {actual}, expected {expected}")]
    Conflict {
        app: String,
        expected: Slot,
        actual: Slot,
    },
}

/// Errors from the per-application deployment lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock for {app} is held by {holder}")]
    Held { app: String, holder: String },

    #[error("lock I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
