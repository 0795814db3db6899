//! Upload gating on the receiving (host) side.
//!
//! Uploads are the only operation where a remote peer causes writes, so
//! every stage is checked: the announcement against policy and declared
//! bounds, each chunk against the record, the completion against the
//! integrity tag. Whatever happens, the announcing peer gets a response.

use crate::error::ClientError;
use crate::paths::validate_upload_path;
use crate::rate_limit::RequestLimiter;
use partake_crypto::{SessionKey, Tag, TransferNonce, derive_transfer_key, verify_tag};
use partake_proto::{MAX_FILE_SIZE, chunk_count};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// An upload record with no chunk activity for this long is reclaimed.
pub const UPLOAD_INACTIVITY: Duration = Duration::from_secs(300);

struct PendingUpload {
    declared_size: u64,
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    bytes: u64,
    last_activity: Instant,
}

/// Tracks in-flight uploads, keyed by `(peer id, path)`.
#[derive(Default)]
pub struct UploadManager {
    pending: Mutex<HashMap<(String, String), PendingUpload>>,
}

impl UploadManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate an `upload-start` announcement.
    ///
    /// A retransmitted start for the same `(peer, path)` replaces the prior
    /// record, so a sender restart begins clean.
    ///
    /// # Errors
    ///
    /// Returns the refusal to report in the `upload-response`: write access
    /// off, rate limit, invalid path, oversize, or a chunk count outside
    /// `[1, ceil(size / CHUNK_SIZE) + 1]`.
    pub fn begin(
        &self,
        peer: &str,
        path: &str,
        declared_size: u64,
        total_chunks: u32,
        allow_write: bool,
        limiter: &RequestLimiter,
    ) -> Result<(), ClientError> {
        if !allow_write {
            return Err(ClientError::UploadRejected("uploads are disabled".into()));
        }
        if !limiter.allow(peer) {
            return Err(ClientError::RateLimited);
        }
        validate_upload_path(path)?;
        if declared_size > MAX_FILE_SIZE {
            return Err(ClientError::TooLarge {
                size: declared_size,
                limit: MAX_FILE_SIZE,
            });
        }
        let ceiling = chunk_count(declared_size).saturating_add(1);
        if total_chunks == 0 || total_chunks > ceiling {
            return Err(ClientError::UploadRejected(format!(
                "chunk count {total_chunks} outside 1..={ceiling}"
            )));
        }

        let Ok(mut pending) = self.pending.lock() else {
            return Err(ClientError::UploadRejected("manager unavailable".into()));
        };
        let key = (peer.to_owned(), path.to_owned());
        if pending
            .insert(
                key,
                PendingUpload {
                    declared_size,
                    chunks: vec![None; total_chunks as usize],
                    received: 0,
                    bytes: 0,
                    last_activity: Instant::now(),
                },
            )
            .is_some()
        {
            debug!(peer, path, "upload restarted, prior record replaced");
        }
        Ok(())
    }

    /// Store one upload chunk.
    ///
    /// # Errors
    ///
    /// Out-of-bounds or duplicate chunks are rejected but leave the record
    /// standing; cumulative bytes exceeding the declared size abort the
    /// whole record.
    pub fn accept_chunk(
        &self,
        peer: &str,
        path: &str,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) -> Result<(), ClientError> {
        let Ok(mut pending) = self.pending.lock() else {
            return Err(ClientError::NoPendingTransfer(path.to_owned()));
        };
        let key = (peer.to_owned(), path.to_owned());
        let (size, declared) = {
            let Some(record) = pending.get_mut(&key) else {
                return Err(ClientError::NoPendingTransfer(path.to_owned()));
            };
            record.last_activity = Instant::now();

            if total as usize != record.chunks.len() || index >= total {
                return Err(ClientError::ChunkBounds {
                    path: path.to_owned(),
                    index,
                    total,
                });
            }
            if record.chunks[index as usize].is_some() {
                return Err(ClientError::UploadRejected(format!(
                    "duplicate chunk {index}"
                )));
            }
            let after = record.bytes.saturating_add(data.len() as u64);
            if after <= record.declared_size {
                record.chunks[index as usize] = Some(data);
                record.received += 1;
                record.bytes = after;
                return Ok(());
            }
            (after, record.declared_size)
        };
        pending.remove(&key);
        warn!(peer, path, "upload aborted, bytes exceed declared size");
        Err(ClientError::TooLarge {
            size,
            limit: declared,
        })
    }

    /// Finish an upload: require every chunk, verify the tag, return the
    /// assembled bytes for atomic persistence. The record is removed on
    /// every outcome.
    ///
    /// # Errors
    ///
    /// `NoPendingTransfer`, `Incomplete`, or `Integrity`, mapped by the
    /// caller into the `upload-response` reason.
    pub fn complete(
        &self,
        session_key: &SessionKey,
        peer: &str,
        path: &str,
        nonce_b64: &str,
        tag_b64: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let key = (peer.to_owned(), path.to_owned());
        let record = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&key))
            .ok_or_else(|| ClientError::NoPendingTransfer(path.to_owned()))?;

        let total = record.chunks.len() as u32;
        if record.received != total {
            return Err(ClientError::Incomplete {
                path: path.to_owned(),
                received: record.received,
                total,
            });
        }

        let mut bytes = Vec::with_capacity(record.declared_size as usize);
        for chunk in record.chunks.into_iter().flatten() {
            bytes.extend_from_slice(&chunk);
        }

        let nonce = TransferNonce::from_base64(nonce_b64)?;
        let tag = Tag::from_base64(tag_b64)?;
        let mac_key = derive_transfer_key(session_key, &nonce);
        if !verify_tag(&mac_key, &bytes, &tag) {
            return Err(ClientError::Integrity(path.to_owned()));
        }
        Ok(bytes)
    }

    /// Reclaim records idle past [`UPLOAD_INACTIVITY`]; returns the count.
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    fn evict_stale_at(&self, now: Instant) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };
        let before = pending.len();
        pending.retain(|(peer, path), record| {
            let keep = now.duration_since(record.last_activity) < UPLOAD_INACTIVITY;
            if !keep {
                warn!(peer, path, "stale upload reclaimed");
            }
            keep
        });
        before - pending.len()
    }

    /// Drop every record belonging to a departed peer.
    pub fn drop_peer(&self, peer: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|(owner, _), _| owner != peer);
        }
    }

    /// Whether an upload is in flight for `(peer, path)`.
    #[must_use]
    pub fn is_pending(&self, peer: &str, path: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains_key(&(peer.to_owned(), path.to_owned())))
            .unwrap_or(false)
    }
}
