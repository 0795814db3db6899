//! Server error types.

use thiserror::Error;

/// Errors surfaced by the signaling/relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener or connection I/O failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failed
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Claim store (Redis) operation failed
    #[error("claim store error: {0}")]
    ClaimStore(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<redis::RedisError> for ServerError {
    fn from(err: redis::RedisError) -> Self {
        Self::ClaimStore(err.to_string())
    }
}
