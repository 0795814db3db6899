//! In-memory room membership.
//!
//! A room is a set of connected peers, each reachable through a bounded
//! outbound channel drained by that connection's writer task. Sending
//! through the channel rather than the socket directly means a slow
//! reader stalls only its own writer task; when its channel fills, the
//! message is dropped and the slow peer misses it.

use crate::limits::{MAX_ROOM_PEERS, MAX_ROOMS};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefusal {
    /// The room already holds [`MAX_ROOM_PEERS`] peers
    RoomFull,
    /// This instance already tracks [`MAX_ROOMS`] rooms
    TooManyRooms,
}

impl JoinRefusal {
    /// Client-facing reason string.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::RoomFull => "room is full",
            Self::TooManyRooms => "server is at capacity",
        }
    }
}

/// One room's peers, keyed by peer id.
#[derive(Debug, Default)]
pub struct Room {
    peers: Mutex<HashMap<String, mpsc::Sender<Message>>>,
}

impl Room {
    /// Peer ids currently in the room.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<String> {
        match self.peers.lock() {
            Ok(peers) => peers.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of peers currently in the room.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether the room has no peers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` for one peer. Dropped silently if the peer is gone
    /// or its outbound channel is full.
    pub fn send_to(&self, peer_id: &str, message: Message) {
        let sender = match self.peers.lock() {
            Ok(peers) => peers.get(peer_id).cloned(),
            Err(_) => None,
        };
        if let Some(sender) = sender
            && sender.try_send(message).is_err()
        {
            warn!(peer_id, "outbound channel full, dropping message");
        }
    }

    /// Queue `message` for every peer except `except`.
    pub fn broadcast_except(&self, except: &str, message: &Message) {
        let senders: Vec<(String, mpsc::Sender<Message>)> = match self.peers.lock() {
            Ok(peers) => peers
                .iter()
                .filter(|(id, _)| id.as_str() != except)
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect(),
            Err(_) => Vec::new(),
        };
        for (peer_id, sender) in senders {
            if sender.try_send(message.clone()).is_err() {
                warn!(peer_id, "outbound channel full, dropping broadcast");
            }
        }
    }
}

/// All rooms on this instance.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: DashMap<String, Arc<Room>>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer_id` to `room_id`, creating the room if needed.
    ///
    /// # Errors
    ///
    /// Returns the refusal reason when the room or the instance is full.
    pub fn join(
        &self,
        room_id: &str,
        peer_id: &str,
        outbound: mpsc::Sender<Message>,
    ) -> Result<Arc<Room>, JoinRefusal> {
        if !self.rooms.contains_key(room_id) && self.rooms.len() >= MAX_ROOMS {
            return Err(JoinRefusal::TooManyRooms);
        }
        let room = self
            .rooms
            .entry(room_id.to_owned())
            .or_default()
            .value()
            .clone();
        {
            let mut peers = match room.peers.lock() {
                Ok(peers) => peers,
                Err(poisoned) => poisoned.into_inner(),
            };
            if peers.len() >= MAX_ROOM_PEERS {
                return Err(JoinRefusal::RoomFull);
            }
            peers.insert(peer_id.to_owned(), outbound);
        }
        debug!(room_id, peer_id, "peer joined room");
        Ok(room)
    }

    /// Remove `peer_id` from `room_id`, destroying the room if it empties.
    ///
    /// Returns `true` when the room was destroyed.
    pub fn leave(&self, room_id: &str, peer_id: &str) -> bool {
        let Some(room) = self.rooms.get(room_id).map(|r| r.value().clone()) else {
            return false;
        };
        if let Ok(mut peers) = room.peers.lock() {
            peers.remove(peer_id);
        }
        if room.is_empty()
            && self
                .rooms
                .remove_if(room_id, |_, r| r.is_empty())
                .is_some()
        {
            debug!(room_id, "room destroyed");
            return true;
        }
        false
    }

    /// Look up an existing room.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    /// Number of rooms currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_join_and_leave() {
        let registry = Registry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        let room = registry.join("room1", "a", tx_a).unwrap();
        registry.join("room1", "b", tx_b).unwrap();
        assert_eq!(room.len(), 2);
        assert_eq!(registry.len(), 1);

        assert!(!registry.leave("room1", "a"));
        assert!(registry.leave("room1", "b"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_room_capacity() {
        let registry = Registry::new();
        for i in 0..MAX_ROOM_PEERS {
            let (tx, _rx) = channel();
            registry.join("room1", &format!("p{i}"), tx).unwrap();
        }
        let (tx, _rx) = channel();
        assert_eq!(
            registry.join("room1", "one-more", tx).unwrap_err(),
            JoinRefusal::RoomFull
        );
    }

    #[tokio::test]
    async fn test_send_to_routes_one_peer() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let room = registry.join("room1", "a", tx_a).unwrap();
        registry.join("room1", "b", tx_b).unwrap();

        room.send_to("b", Message::Text("hello".into()));
        assert_eq!(rx_b.recv().await.unwrap(), Message::Text("hello".into()));
        assert!(rx_a.try_recv().is_err());

        // unknown target is a silent drop
        room.send_to("missing", Message::Text("lost".into()));
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, mut rx_c) = channel();
        let room = registry.join("room1", "a", tx_a).unwrap();
        registry.join("room1", "b", tx_b).unwrap();
        registry.join("room1", "c", tx_c).unwrap();

        room.broadcast_except("a", &Message::Text("joined".into()));
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(1);
        let room = registry.join("room1", "slow", tx).unwrap();
        room.send_to("slow", Message::Text("1".into()));
        // channel is now full; this must not block or panic
        room.send_to("slow", Message::Text("2".into()));
    }
}
