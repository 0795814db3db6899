//! Per-peer sliding-window request limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Download requests allowed per peer per window.
pub const DOWNLOAD_RATE_LIMIT: usize = 60;

/// Upload announcements allowed per peer per window.
pub const UPLOAD_RATE_LIMIT: usize = 30;

/// Window length for both limiters.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding 60-second window per peer id.
///
/// Timestamps older than the window are pruned on each check, so a peer's
/// budget refills continuously rather than at a fixed boundary.
pub struct RequestLimiter {
    limit: usize,
    window: Duration,
    by_peer: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RequestLimiter {
    /// Limiter allowing `limit` requests per [`RATE_WINDOW`].
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            window: RATE_WINDOW,
            by_peer: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request; `true` when it fits the budget.
    pub fn allow(&self, peer_id: &str) -> bool {
        self.allow_at(peer_id, Instant::now())
    }

    fn allow_at(&self, peer_id: &str, now: Instant) -> bool {
        let Ok(mut by_peer) = self.by_peer.lock() else {
            return false;
        };
        let stamps = by_peer.entry(peer_id.to_owned()).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.window);
        if stamps.len() >= self.limit {
            return false;
        }
        stamps.push(now);
        true
    }

    /// Drop a departed peer's history.
    pub fn forget(&self, peer_id: &str) {
        if let Ok(mut by_peer) = self.by_peer.lock() {
            by_peer.remove(peer_id);
        }
    }
}
