//! Common error types for Radio Revive

use thiserror::Error;

/// Common result type for Radio Revive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the agent and the stores
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Command carried an action this agent does not understand
    #[error("Unknown command action: {0}")]
    UnknownAction(String),

    /// Invalid document field or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
