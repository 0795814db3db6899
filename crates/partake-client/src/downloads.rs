//! Download tracking on the requesting side.
//!
//! A download exists from the moment `file-request` goes out until the
//! `file-complete` announcement verifies. Chunks arrive in any order and
//! possibly twice (once per path around a relay switch); the sparse buffer
//! takes the first copy of each index and ignores the rest.

use crate::error::ClientError;
use partake_crypto::{SessionKey, Tag, TransferNonce, derive_transfer_key, verify_tag};
use partake_proto::{MAX_FILE_SIZE, chunk_count};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

struct PendingDownload {
    declared_size: u64,
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
}

/// Tracks in-flight downloads, keyed by share-relative path.
#[derive(Default)]
pub struct DownloadManager {
    pending: Mutex<HashMap<String, PendingDownload>>,
}

impl DownloadManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a download before the request is sent.
    ///
    /// # Errors
    ///
    /// Rejects oversize files (nothing is sent for those) and paths that
    /// already have a download in flight.
    pub fn begin(&self, path: &str, declared_size: u64) -> Result<(), ClientError> {
        if declared_size > MAX_FILE_SIZE {
            return Err(ClientError::TooLarge {
                size: declared_size,
                limit: MAX_FILE_SIZE,
            });
        }
        let Ok(mut pending) = self.pending.lock() else {
            return Err(ClientError::NoPendingTransfer(path.to_owned()));
        };
        if pending.contains_key(path) {
            return Err(ClientError::InvalidPath(format!(
                "{path:?}: download already in flight"
            )));
        }
        pending.insert(
            path.to_owned(),
            PendingDownload {
                declared_size,
                chunks: Vec::new(),
                received: 0,
            },
        );
        Ok(())
    }

    /// Store one chunk; first write per index wins.
    ///
    /// Returns `(received, total)` after the insert for progress reporting.
    /// Chunks for unknown paths are dropped (`None`).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ChunkBounds` on an out-of-range index or a
    /// total disagreeing with the declared size. The size was vetted at
    /// [`begin`](Self::begin), so `total` never sizes an allocation the
    /// sender made up.
    pub fn accept_chunk(
        &self,
        path: &str,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) -> Result<Option<(u32, u32)>, ClientError> {
        let Ok(mut pending) = self.pending.lock() else {
            return Ok(None);
        };
        let Some(record) = pending.get_mut(path) else {
            debug!(path, "dropping chunk for unrequested file");
            return Ok(None);
        };
        if total != chunk_count(record.declared_size) || index >= total {
            return Err(ClientError::ChunkBounds {
                path: path.to_owned(),
                index,
                total,
            });
        }
        if record.chunks.is_empty() {
            record.chunks = vec![None; total as usize];
        }
        let slot = &mut record.chunks[index as usize];
        if slot.is_none() {
            *slot = Some(data);
            record.received += 1;
        }
        Ok(Some((record.received, record.chunks.len() as u32)))
    }

    /// Finish a download: require every chunk, assemble in order, re-derive
    /// the transfer key from the announced nonce, and verify the tag.
    ///
    /// The record is removed on every outcome; nothing is ever kept after
    /// a failure, so nothing partial can be persisted.
    ///
    /// # Errors
    ///
    /// `NoPendingTransfer` for an unknown path, `Incomplete` when chunks are
    /// missing, `Integrity` when the tag does not verify.
    pub fn complete(
        &self,
        key: &SessionKey,
        path: &str,
        nonce_b64: &str,
        tag_b64: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let record = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(path))
            .ok_or_else(|| ClientError::NoPendingTransfer(path.to_owned()))?;

        let total = record.chunks.len() as u32;
        if record.chunks.is_empty() || record.received != total {
            return Err(ClientError::Incomplete {
                path: path.to_owned(),
                received: record.received,
                total,
            });
        }

        let mut bytes = Vec::with_capacity(record.declared_size as usize);
        for chunk in record.chunks {
            // full by the received == total gate above
            if let Some(chunk) = chunk {
                bytes.extend_from_slice(&chunk);
            }
        }

        let nonce = TransferNonce::from_base64(nonce_b64)?;
        let tag = Tag::from_base64(tag_b64)?;
        let mac_key = derive_transfer_key(key, &nonce);
        if !verify_tag(&mac_key, &bytes, &tag) {
            return Err(ClientError::Integrity(path.to_owned()));
        }
        Ok(bytes)
    }

    /// Drop a download without completing it.
    pub fn abort(&self, path: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(path);
        }
    }

    /// Whether a download is in flight for `path`.
    #[must_use]
    pub fn is_pending(&self, path: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains_key(path))
            .unwrap_or(false)
    }
}

/// Bounded fan-out for whole-share downloads.
///
/// At most `limit` files download concurrently; each completion releases a
/// slot for the next queued path.
pub struct FanOut {
    limit: usize,
    queue: VecDeque<String>,
    active: usize,
}

/// Default concurrency for folder downloads.
pub const FOLDER_FANOUT: usize = 3;

impl FanOut {
    /// Fan-out with `limit` concurrent slots.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            queue: VecDeque::new(),
            active: 0,
        }
    }

    /// Add paths to the back of the queue.
    pub fn enqueue<I: IntoIterator<Item = String>>(&mut self, paths: I) {
        self.queue.extend(paths);
    }

    /// Claim as many start slots as are free; returns the paths to request.
    pub fn start_available(&mut self) -> Vec<String> {
        let mut started = Vec::new();
        while self.active < self.limit {
            let Some(path) = self.queue.pop_front() else {
                break;
            };
            self.active += 1;
            started.push(path);
        }
        started
    }

    /// Release a slot after a file finishes (or fails); returns the next
    /// path to request, if any.
    pub fn finish_one(&mut self) -> Option<String> {
        self.active = self.active.saturating_sub(1);
        let next = self.queue.pop_front();
        if next.is_some() {
            self.active += 1;
        }
        next
    }

    /// True once the queue is drained and no download is active.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.active == 0 && self.queue.is_empty()
    }
}
