//! # Partake Proto
//!
//! Wire framing for the Partake transfer protocol.
//!
//! This crate provides:
//! - Binary frame encoding and decoding (one-byte type tag)
//! - JSON control and signaling message definitions
//! - Chunked-JSON splitting and reassembly for oversized messages
//! - The relay envelope carried over the signaling connection
//!
//! Every frame produced here is sealed by `partake-crypto` before it crosses
//! a peer transport; the relay server only ever forwards opaque ciphertext.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunking;
pub mod error;
pub mod frame;
pub mod message;
pub mod relay;

pub use chunking::{JsonReassembler, split_json};
pub use error::ProtoError;
pub use frame::{Frame, FrameType};
pub use message::{ControlMessage, FileEntry, SignalMessage};
pub use relay::RelayEnvelope;

/// Fixed size of each file chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Ceiling for a single-frame JSON document (48 KiB).
///
/// Leaves headroom under the transport's per-message limit after encryption
/// overhead; larger documents are split into `JsonChunk` frames.
pub const MAX_JSON_SIZE: usize = 48 * 1024;

/// Maximum allowed file size for transfers (2 GiB).
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// How long an incomplete chunked-JSON buffer is kept before reclaim.
pub const JSON_BUFFER_TTL: std::time::Duration = std::time::Duration::from_secs(60);

/// Longest accepted room identifier.
pub const MAX_ROOM_ID_LEN: usize = 32;

/// Whether `room` has the accepted shape (1..=32 chars of `[A-Za-z0-9_-]`).
#[must_use]
pub fn valid_room_id(room: &str) -> bool {
    !room.is_empty()
        && room.len() <= MAX_ROOM_ID_LEN
        && room
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Number of chunks a file of `size` bytes splits into (at least 1).
#[must_use]
pub fn chunk_count(size: u64) -> u32 {
    let chunks = size.div_ceil(CHUNK_SIZE as u64);
    u32::try_from(chunks.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_shape() {
        assert!(valid_room_id("abc_DEF-123"));
        assert!(!valid_room_id(""));
        assert!(!valid_room_id(&"x".repeat(33)));
        assert!(!valid_room_id("has space"));
        assert!(!valid_room_id("sla/sh"));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 1);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(chunk_count(10 * 1024 * 1024), 160);
    }
}
