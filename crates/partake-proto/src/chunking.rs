//! Splitting and reassembly of oversized JSON messages.
//!
//! A serialized control message larger than [`MAX_JSON_SIZE`](crate::MAX_JSON_SIZE)
//! is split into `JsonChunk` frames sharing a message id. The receiving side
//! buffers fragments until all indices arrive, concatenates them in index
//! order, and parses the result. Incomplete buffers are discarded after
//! [`JSON_BUFFER_TTL`](crate::JSON_BUFFER_TTL) to bound memory.

use crate::error::ProtoError;
use crate::frame::Frame;
use crate::{JSON_BUFFER_TTL, MAX_JSON_SIZE};
use std::collections::HashMap;
use std::time::Instant;

/// Most fragments one chunked JSON message may declare.
///
/// A full file list tops out around two hundred fragments; 1024 keeps ample
/// headroom while bounding what a single `total` field can make the
/// reassembler allocate.
pub const MAX_JSON_CHUNKS: u32 = 1024;

/// Split serialized JSON into frames.
///
/// Documents within the single-frame ceiling become one `Json` frame;
/// larger documents become `JsonChunk` frames under `message_id`.
#[must_use]
pub fn split_json(body: &[u8], message_id: u32) -> Vec<Frame> {
    if body.len() <= MAX_JSON_SIZE {
        return vec![Frame::Json(body.to_vec())];
    }

    let total = body.len().div_ceil(MAX_JSON_SIZE) as u32;
    body.chunks(MAX_JSON_SIZE)
        .enumerate()
        .map(|(i, piece)| Frame::JsonChunk {
            message_id,
            index: i as u32,
            total,
            data: piece.to_vec(),
        })
        .collect()
}

struct PartialMessage {
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    last_activity: Instant,
}

/// Reassembles chunked JSON messages, keyed by message id.
///
/// One reassembler lives inside each peer transport's receive worker, so
/// insertion is never concurrent for a given peer.
pub struct JsonReassembler {
    buffers: HashMap<u32, PartialMessage>,
}

impl JsonReassembler {
    /// Create an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
        }
    }

    /// Insert one fragment.
    ///
    /// Returns the complete document once all fragments of a message have
    /// arrived. Duplicate indices are ignored; the first write wins.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::ChunkBounds` when `total` is zero or above
    /// [`MAX_JSON_CHUNKS`], `index` is out of bounds, or `total` disagrees
    /// with earlier fragments of the same message.
    pub fn insert(
        &mut self,
        message_id: u32,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, ProtoError> {
        // bound-check before the buffer exists; `total` comes off the wire
        // and sizes the allocation below
        if total == 0 || total > MAX_JSON_CHUNKS || index >= total {
            return Err(ProtoError::ChunkBounds { index, total });
        }

        let entry = self.buffers.entry(message_id).or_insert_with(|| PartialMessage {
            chunks: vec![None; total as usize],
            received: 0,
            last_activity: Instant::now(),
        });

        if entry.chunks.len() != total as usize {
            return Err(ProtoError::ChunkBounds { index, total });
        }

        let slot = &mut entry.chunks[index as usize];
        if slot.is_none() {
            *slot = Some(data);
            entry.received += 1;
            entry.last_activity = Instant::now();
        }

        if entry.received == total
            && let Some(entry) = self.buffers.remove(&message_id)
        {
            let mut full = Vec::new();
            for chunk in entry.chunks.into_iter().flatten() {
                full.extend_from_slice(&chunk);
            }
            return Ok(Some(full));
        }
        Ok(None)
    }

    /// Discard buffers that have seen no fragment for the TTL.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.buffers
            .retain(|_, partial| now.duration_since(partial.last_activity) < JSON_BUFFER_TTL);
    }

    /// Number of in-flight partial messages.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Drop all partial messages (transport teardown).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

impl Default for JsonReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fragments(frames: &[Frame]) -> Vec<(u32, u32, u32, Vec<u8>)> {
        frames
            .iter()
            .map(|f| match f {
                Frame::JsonChunk {
                    message_id,
                    index,
                    total,
                    data,
                } => (*message_id, *index, *total, data.clone()),
                _ => panic!("expected JsonChunk"),
            })
            .collect()
    }

    #[test]
    fn test_small_message_single_frame() {
        let frames = split_json(b"{\"type\":\"file-request\"}", 0);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Json(_)));
    }

    #[test]
    fn test_large_message_chunked_and_reassembled() {
        let body = vec![b'x'; MAX_JSON_SIZE * 2 + 100];
        let frames = split_json(&body, 42);
        assert_eq!(frames.len(), 3);

        let mut reasm = JsonReassembler::new();
        let mut result = None;
        for (id, index, total, data) in fragments(&frames) {
            result = reasm.insert(id, index, total, data).unwrap();
        }
        assert_eq!(result.unwrap(), body);
        assert_eq!(reasm.pending(), 0);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let body = vec![b'y'; MAX_JSON_SIZE * 3];
        let frames = split_json(&body, 1);
        let mut parts = fragments(&frames);
        parts.reverse();

        let mut reasm = JsonReassembler::new();
        let mut result = None;
        for (id, index, total, data) in parts {
            result = reasm.insert(id, index, total, data).unwrap();
        }
        assert_eq!(result.unwrap(), body);
    }

    #[test]
    fn test_duplicate_index_ignored() {
        let mut reasm = JsonReassembler::new();
        assert!(reasm.insert(5, 0, 2, b"first".to_vec()).unwrap().is_none());
        // duplicate with different data must not overwrite or double-count
        assert!(reasm.insert(5, 0, 2, b"SECOND".to_vec()).unwrap().is_none());
        let full = reasm.insert(5, 1, 2, b"-tail".to_vec()).unwrap().unwrap();
        assert_eq!(full, b"first-tail");
    }

    #[test]
    fn test_concurrent_messages_isolated() {
        let mut reasm = JsonReassembler::new();
        assert!(reasm.insert(1, 0, 2, b"a0".to_vec()).unwrap().is_none());
        assert!(reasm.insert(2, 0, 2, b"b0".to_vec()).unwrap().is_none());
        assert_eq!(reasm.insert(2, 1, 2, b"b1".to_vec()).unwrap().unwrap(), b"b0b1");
        assert_eq!(reasm.insert(1, 1, 2, b"a1".to_vec()).unwrap().unwrap(), b"a0a1");
    }

    #[test]
    fn test_bad_bounds_rejected() {
        let mut reasm = JsonReassembler::new();
        assert!(reasm.insert(0, 0, 0, vec![]).is_err());
        assert!(reasm.insert(0, 2, 2, vec![]).is_err());
        // total disagreeing with the first fragment
        assert!(reasm.insert(9, 0, 3, b"x".to_vec()).unwrap().is_none());
        assert!(reasm.insert(9, 1, 4, b"y".to_vec()).is_err());
    }

    #[test]
    fn test_fragment_count_ceiling() {
        let mut reasm = JsonReassembler::new();
        // a single fragment must not be able to reserve gigabytes
        assert!(reasm.insert(0, 0, u32::MAX, b"x".to_vec()).is_err());
        assert!(reasm.insert(0, 0, MAX_JSON_CHUNKS + 1, b"x".to_vec()).is_err());
        assert_eq!(reasm.pending(), 0);
        assert!(
            reasm
                .insert(0, 0, MAX_JSON_CHUNKS, b"x".to_vec())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_clear_releases_buffers() {
        let mut reasm = JsonReassembler::new();
        reasm.insert(1, 0, 3, b"x".to_vec()).unwrap();
        assert_eq!(reasm.pending(), 1);
        reasm.clear();
        assert_eq!(reasm.pending(), 0);
    }

    proptest! {
        // reassembly is order-independent: any permutation of fragments
        // yields the original document
        #[test]
        fn reassembly_order_independent(
            body in prop::collection::vec(any::<u8>(), MAX_JSON_SIZE + 1..MAX_JSON_SIZE * 4),
            seed in any::<u64>(),
        ) {
            let frames = split_json(&body, 7);
            let mut parts = fragments(&frames);

            // deterministic shuffle from the seed
            let mut state = seed;
            for i in (1..parts.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                parts.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let mut reasm = JsonReassembler::new();
            let mut result = None;
            for (id, index, total, data) in parts {
                result = reasm.insert(id, index, total, data).unwrap();
            }
            prop_assert_eq!(result.unwrap(), body);
        }
    }
}
