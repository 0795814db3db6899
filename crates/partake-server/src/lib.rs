//! # Partake Server
//!
//! WebSocket signaling and relay server for Partake.
//!
//! The server brokers rooms: it assigns peer identities, forwards opaque
//! negotiation signals between peers, and relays encrypted binary frames
//! when a direct channel is unavailable. It never holds key material and
//! never inspects relayed payloads.
//!
//! When several instances share a Redis claim store, rooms are owned by
//! exactly one instance at a time and clients landing elsewhere are
//! redirected to the owner.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod limits;
pub mod rooms;
pub mod server;

pub use config::ServerConfig;
pub use coordinator::{CLAIM_TTL, ClaimStore, Coordinator, MemoryClaimStore, RoomOwnership};
pub use error::ServerError;
pub use limits::{ConnectionBudget, MAX_RELAY_MESSAGE, MAX_ROOM_PEERS};
pub use rooms::{Registry, Room};
pub use server::Server;
