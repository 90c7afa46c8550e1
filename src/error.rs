//! ClawBridge error types

use thiserror::Error;

/// ClawBridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relay server error
    #[error("Relay error: {0}")]
    Relay(String),

    /// WebSocket transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame sent while the transport is not connected
    #[error("WebSocket is not connected")]
    NotConnected,

    /// Persistence substrate error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// Result type alias for ClawBridge operations
pub type Result<T> = std::result::Result<T, Error>;
