//! Error types for the session core

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Stale identifier: not live and nothing persisted to restore
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Neither a live nor a saved session carries this identifier
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn process in {cwd:?}: {message}")]
    Spawn { cwd: PathBuf, message: String },

    #[error("Failed to read session state from {path:?}: {message}")]
    PersistenceRead { path: PathBuf, message: String },

    #[error("Failed to write session state to {path:?}: {source}")]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    /// The registry has saved its sessions and accepts no further changes
    #[error("Session registry is shutting down")]
    ShuttingDown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serialization(e.to_string())
    }
}
