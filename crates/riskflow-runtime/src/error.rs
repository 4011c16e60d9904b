//! Runtime error types

use thiserror::Error;

/// Runtime error
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// State store operation failed
    #[error("State store error: {0}")]
    StateStore(String),

    /// External call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Sink write exhausted its retry budget
    #[error("Sink write failed on '{topic}': {reason}")]
    SinkWrite { topic: String, reason: String },

    /// Configuration rejected at startup
    #[error("Invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    /// Record serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Pipeline channel closed while the stage was still running
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
