//! Client error types.

use thiserror::Error;

/// Errors from transfer orchestration.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A path failed validation.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Declared or actual size exceeds the transfer ceiling.
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Offending size
        size: u64,
        /// The ceiling it exceeded
        limit: u64,
    },

    /// A peer exhausted its request budget.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The requested path is not in the share.
    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// No transfer is pending under this path.
    #[error("no pending transfer for {0}")]
    NoPendingTransfer(String),

    /// A chunk arrived with an index or total that does not fit the record.
    #[error("chunk out of bounds for {path}: index {index} of {total}")]
    ChunkBounds {
        /// Transfer path
        path: String,
        /// Offending index
        index: u32,
        /// Declared total
        total: u32,
    },

    /// Completion was announced before every chunk arrived.
    #[error("incomplete transfer for {path}: {received} of {total} chunks")]
    Incomplete {
        /// Transfer path
        path: String,
        /// Chunks on hand
        received: u32,
        /// Chunks declared
        total: u32,
    },

    /// The whole-file integrity tag did not verify.
    #[error("integrity check failed for {0}")]
    Integrity(String),

    /// An upload announcement was refused.
    #[error("upload rejected: {0}")]
    UploadRejected(String),

    /// The share link could not be parsed.
    #[error("invalid share link: {0}")]
    InvalidLink(String),

    /// The room lives on another server instance.
    #[error("room is owned by instance {0}, reconnect there")]
    Redirected(String),

    /// The server refused us.
    #[error("server error: {0}")]
    Server(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Crypto failure.
    #[error(transparent)]
    Crypto(#[from] partake_crypto::CryptoError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] partake_transport::TransportError),

    /// Codec failure.
    #[error(transparent)]
    Proto(#[from] partake_proto::ProtoError),
}
