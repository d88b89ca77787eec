//! Common error types for linq.

use thiserror::Error;

/// Result type alias using linq's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the relay and the peer side.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket bind, accept, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a message failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Inbound payload could not be decoded into a signaling message
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a malformed message error from any displayable type.
    pub fn malformed(msg: impl std::fmt::Display) -> Self {
        Self::MalformedMessage(msg.to_string())
    }
}
