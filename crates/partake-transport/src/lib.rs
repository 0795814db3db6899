//! # Partake Transport
//!
//! Dual-path peer transport for Partake.
//!
//! Each remote peer gets a [`PeerTransport`] that prefers a low-latency
//! direct channel and falls back, permanently, to relaying encrypted frames
//! through the signaling server when the direct path fails to open or dies
//! mid-stream. The relay fallback is invisible to callers beyond a state
//! change event: sends keep succeeding, received frames keep arriving in
//! one ordered stream.
//!
//! The direct channel itself is abstracted behind [`DirectChannel`], so the
//! transport logic is independent of the datagram protocol underneath and
//! fully testable with the in-memory doubles in [`testing`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod peer;
pub mod signaling;
pub mod testing;

pub use channel::{ChannelEvent, DirectChannel, SignalingSink};
pub use error::TransportError;
pub use peer::{
    BUFFER_HIGH_WATER, BUFFER_LOW_WATER, DIRECT_FALLBACK_TIMEOUT, PeerEvent, PeerState,
    PeerTransport, PeerTransportConfig,
};
pub use signaling::{SignalingClient, SignalingEvent};
