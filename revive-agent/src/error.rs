//! Error types for revive-agent
//!
//! Defines agent-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document store errors
    #[error("Store error: {0}")]
    Store(#[from] revive_common::Error),

    /// Renderer subprocess could not be spawned or signalled
    #[error("Process error: {0}")]
    Process(String),

    /// Mixer tool errors
    #[error("Mixer error: {0}")]
    Mixer(String),

    /// Request not valid in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Playback controller task is gone
    #[error("Playback controller is not running")]
    ControllerClosed,

    /// An administrative update step failed
    #[error("Update step '{step}' failed: {reason}")]
    UpdateStep { step: String, reason: String },

    /// Auto-play could not resolve a playback target
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the agent Error
pub type Result<T> = std::result::Result<T, Error>;
