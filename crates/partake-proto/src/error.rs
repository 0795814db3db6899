//! Error types for the Partake wire protocol.

use thiserror::Error;

/// Protocol framing errors.
///
/// A frame that fails to parse is dropped and logged by the receiving
/// transport; it never aborts the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Path length field exceeds the remaining frame
    #[error("path length exceeds frame")]
    PathOverflow,

    /// Path bytes are not valid UTF-8
    #[error("path is not valid UTF-8")]
    InvalidPath,

    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(String),

    /// Chunked-JSON bookkeeping is inconsistent (zero total, index out of
    /// bounds, or totals disagreeing across chunks of one message)
    #[error("inconsistent chunk bounds: index {index} of {total}")]
    ChunkBounds {
        /// Chunk index carried by the frame
        index: u32,
        /// Declared total chunk count
        total: u32,
    },

    /// Relay envelope is malformed
    #[error("malformed relay envelope")]
    BadEnvelope,
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        ProtoError::Json(err.to_string())
    }
}
