//! Error types for the bus abstraction layer.

use thiserror::Error;

/// Errors that can occur while talking to a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport-level failure (connection closed, broker unreachable, etc.)
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// The bus has been shut down and no longer accepts operations
    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a codec error.
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }
}
