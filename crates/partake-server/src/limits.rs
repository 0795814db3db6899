//! Per-connection abuse ceilings.
//!
//! The server never inspects relayed payloads, so the only defenses it has
//! are counts and sizes. Ceilings are deliberately generous: they exist to
//! stop runaway clients, not to shape ordinary transfers.

use std::time::{Duration, Instant};

/// Most peers allowed in one room.
pub const MAX_ROOM_PEERS: usize = 256;

/// Most rooms one instance will track.
pub const MAX_ROOMS: usize = 100_000_000;

/// Largest accepted binary relay message (2 MiB).
pub const MAX_RELAY_MESSAGE: usize = 2 * 1024 * 1024;

/// Messages one connection may send per minute.
pub const MESSAGES_PER_MINUTE: u64 = 100_000_000;

/// Relay bytes one connection may send per minute (5000 MiB).
pub const RELAY_BYTES_PER_MINUTE: u64 = 5000 * 1024 * 1024;

const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window message and byte counters for one connection.
///
/// Counters reset when a full window has elapsed since the window started,
/// not on a sliding basis; at these ceilings the difference is irrelevant
/// and the bookkeeping is two integers.
#[derive(Debug)]
pub struct ConnectionBudget {
    window_start: Instant,
    messages: u64,
    relay_bytes: u64,
}

impl Default for ConnectionBudget {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBudget {
    /// Fresh budget with an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            messages: 0,
            relay_bytes: 0,
        }
    }

    /// Record one message; `false` means the connection is over budget.
    pub fn allow_message(&mut self) -> bool {
        self.allow_message_at(Instant::now())
    }

    /// Record a relay message of `bytes`; `false` means over budget.
    pub fn allow_relay(&mut self, bytes: usize) -> bool {
        self.allow_relay_at(bytes, Instant::now())
    }

    fn roll_window(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.messages = 0;
            self.relay_bytes = 0;
        }
    }

    fn allow_message_at(&mut self, now: Instant) -> bool {
        self.roll_window(now);
        if self.messages >= MESSAGES_PER_MINUTE {
            return false;
        }
        self.messages += 1;
        true
    }

    fn allow_relay_at(&mut self, bytes: usize, now: Instant) -> bool {
        self.roll_window(now);
        let bytes = bytes as u64;
        if self.relay_bytes.saturating_add(bytes) > RELAY_BYTES_PER_MINUTE {
            return false;
        }
        self.relay_bytes += bytes;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_counted() {
        let mut budget = ConnectionBudget::new();
        let start = Instant::now();
        assert!(budget.allow_message_at(start));
        budget.messages = MESSAGES_PER_MINUTE;
        assert!(!budget.allow_message_at(start));
    }

    #[test]
    fn test_relay_bytes_capped() {
        let mut budget = ConnectionBudget::new();
        let start = Instant::now();
        assert!(budget.allow_relay_at(MAX_RELAY_MESSAGE, start));
        budget.relay_bytes = RELAY_BYTES_PER_MINUTE - 10;
        assert!(!budget.allow_relay_at(11, start));
        assert!(budget.allow_relay_at(10, start));
    }

    #[test]
    fn test_window_resets() {
        let mut budget = ConnectionBudget::new();
        let start = budget.window_start;
        budget.messages = MESSAGES_PER_MINUTE;
        budget.relay_bytes = RELAY_BYTES_PER_MINUTE;
        assert!(!budget.allow_message_at(start));

        let later = start + WINDOW;
        assert!(budget.allow_message_at(later));
        assert!(budget.allow_relay_at(1024, later));
        assert_eq!(budget.messages, 1);
        assert_eq!(budget.relay_bytes, 1024);
    }
}
