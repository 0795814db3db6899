//! Transport error types.

use thiserror::Error;

/// Errors produced by peer transports and the signaling client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport (or the connection behind it) has been closed.
    #[error("transport closed")]
    Closed,

    /// The direct channel refused or failed a send.
    #[error("direct channel error: {0}")]
    Direct(String),

    /// The signaling connection failed.
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] partake_crypto::CryptoError),

    /// Frame or message codec failure.
    #[error(transparent)]
    Proto(#[from] partake_proto::ProtoError),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Signaling(err.to_string())
    }
}
