//! Error types for Testdeck

use thiserror::Error;

/// Result type alias using Testdeck Error
pub type Result<T> = std::result::Result<T, Error>;

/// Testdeck error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("a run is already in progress: {run_id}")]
    AlreadyRunning { run_id: String },

    #[error("no run is in progress")]
    NotRunning,

    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("run not found: {run_id}")]
    NotFound { run_id: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn test process: {0}")]
    Spawn(#[source] std::io::Error),
}
