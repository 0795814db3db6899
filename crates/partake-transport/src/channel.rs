//! Seams between a peer transport and the paths it can send over.
//!
//! The transport itself never speaks a datagram protocol; it drives a
//! [`DirectChannel`] implementation for the low-latency path and a
//! [`SignalingSink`] for negotiation traffic and the relay fallback. Both are
//! trait objects so tests can substitute in-memory implementations.

use crate::error::TransportError;
use async_trait::async_trait;

/// Events surfaced by a direct channel implementation.
///
/// Each channel owns an `mpsc` sender for these; the peer transport's driver
/// task consumes the receiving half.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel finished negotiating and can carry frames.
    Open,
    /// A complete frame arrived on the channel.
    Message(Vec<u8>),
    /// The channel's send buffer drained below the low watermark.
    BufferedLow,
    /// Locally generated negotiation payload that must reach the remote
    /// peer via signaling.
    Signal(serde_json::Value),
    /// The channel failed; it will not recover.
    Error(String),
    /// The channel closed cleanly.
    Closed,
}

/// A bidirectional, unordered-failure-mode channel straight to one peer.
///
/// Sends are non-blocking: the implementation either accepts the frame into
/// its own buffer or fails. Backpressure is the transport's job, via
/// [`buffered_bytes`](DirectChannel::buffered_bytes) and the
/// [`ChannelEvent::BufferedLow`] notification.
#[async_trait]
pub trait DirectChannel: Send + Sync {
    /// Hand a frame to the channel for transmission.
    ///
    /// # Errors
    ///
    /// Fails when the channel is not open or the underlying send fails.
    /// Any error here is terminal for the direct path.
    fn try_send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Bytes accepted but not yet transmitted.
    fn buffered_bytes(&self) -> usize;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Feed a remote negotiation payload into the channel.
    ///
    /// # Errors
    ///
    /// Fails when the payload is malformed for the underlying protocol.
    async fn apply_signal(&self, signal: serde_json::Value) -> Result<(), TransportError>;

    /// Tear the channel down. Idempotent.
    async fn close(&self);
}

/// Outbound half of the signaling connection, as seen by peer transports.
///
/// Implementations provide flow control by suspending the caller (a bounded
/// writer queue); a send that returns is a send that has been accepted.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    /// Forward a negotiation payload to `target`.
    ///
    /// # Errors
    ///
    /// Fails when the signaling connection is gone.
    async fn send_signal(
        &self,
        target: &str,
        signal: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Relay an encrypted frame to `target`.
    ///
    /// # Errors
    ///
    /// Fails when the signaling connection is gone.
    async fn send_relay(&self, target: &str, frame: Vec<u8>) -> Result<(), TransportError>;
}
