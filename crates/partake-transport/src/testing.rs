//! In-memory channel and signaling implementations for tests.
//!
//! [`MemoryChannel`] pairs stand in for a direct channel; [`MemoryHub`]
//! plays the relay role of the signaling server, routing frames between
//! registered peers inside one process. Both expose failure injection so
//! fallback paths can be exercised deterministically.

use crate::channel::{ChannelEvent, DirectChannel, SignalingSink};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One side of an in-memory direct channel pair.
pub struct MemoryChannel {
    open: AtomicBool,
    failing: AtomicBool,
    buffered: AtomicUsize,
    /// Frames sent here surface as `Message` events on the peer side.
    remote_events: Option<mpsc::UnboundedSender<ChannelEvent>>,
    local_events: mpsc::UnboundedSender<ChannelEvent>,
    applied_signals: Mutex<Vec<serde_json::Value>>,
}

impl MemoryChannel {
    /// Build a connected pair. Both sides emit `Open` immediately.
    #[must_use]
    pub fn pair() -> (
        (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>),
        (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>),
    ) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Arc::new(Self {
            open: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            remote_events: Some(b_tx.clone()),
            local_events: a_tx.clone(),
            applied_signals: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Self {
            open: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            remote_events: Some(a_tx.clone()),
            local_events: b_tx.clone(),
            applied_signals: Mutex::new(Vec::new()),
        });

        let _ = a_tx.send(ChannelEvent::Open);
        let _ = b_tx.send(ChannelEvent::Open);
        ((a, a_rx), (b, b_rx))
    }

    /// Build a channel that never finishes negotiating.
    #[must_use]
    pub fn stuck() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            open: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            remote_events: None,
            local_events: tx,
            applied_signals: Mutex::new(Vec::new()),
        });
        (channel, rx)
    }

    /// Make every subsequent `try_send` fail.
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Pretend the send buffer holds `bytes`.
    pub fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    /// Emit a `BufferedLow` event to the owning transport.
    pub fn signal_buffered_low(&self) {
        let _ = self.local_events.send(ChannelEvent::BufferedLow);
    }

    /// Emit a locally generated negotiation payload.
    pub fn emit_signal(&self, signal: serde_json::Value) {
        let _ = self.local_events.send(ChannelEvent::Signal(signal));
    }

    /// Emit a terminal `Error` event to the owning transport.
    pub fn emit_error(&self, reason: &str) {
        let _ = self
            .local_events
            .send(ChannelEvent::Error(reason.to_owned()));
    }

    /// Signals fed in via `apply_signal` so far.
    #[must_use]
    pub fn applied_signals(&self) -> Vec<serde_json::Value> {
        self.applied_signals
            .lock()
            .map(|signals| signals.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DirectChannel for MemoryChannel {
    fn try_send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Direct("injected send failure".into()));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Direct("channel not open".into()));
        }
        let remote = self
            .remote_events
            .as_ref()
            .ok_or_else(|| TransportError::Direct("no remote".into()))?;
        remote
            .send(ChannelEvent::Message(frame.to_vec()))
            .map_err(|_| TransportError::Direct("remote gone".into()))
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn apply_signal(&self, signal: serde_json::Value) -> Result<(), TransportError> {
        if let Ok(mut signals) = self.applied_signals.lock() {
            signals.push(signal);
        }
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Frame delivered through the hub: `(sender peer id, sealed frame)`.
pub type RelayDelivery = (String, Vec<u8>);

/// In-process stand-in for the relay role of the signaling server.
#[derive(Default)]
pub struct MemoryHub {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<RelayDelivery>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a peer; frames addressed to it arrive on the receiver,
    /// tagged with the sender's id.
    pub fn register(&self, peer_id: &str) -> mpsc::UnboundedReceiver<RelayDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(peer_id.to_owned(), tx);
        }
        rx
    }

    /// Build a sink that sends into this hub as `local_id`.
    #[must_use]
    pub fn sink(self: &Arc<Self>, local_id: &str) -> Arc<MemorySink> {
        Arc::new(MemorySink {
            hub: Arc::clone(self),
            local_id: local_id.to_owned(),
            sent_signals: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        })
    }
}

/// [`SignalingSink`] backed by a [`MemoryHub`].
pub struct MemorySink {
    hub: Arc<MemoryHub>,
    local_id: String,
    sent_signals: Mutex<Vec<(String, serde_json::Value)>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl MemorySink {
    /// Make every subsequent send fail, as a dead signaling connection would.
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Park every subsequent relay send forever, as a signaling connection
    /// with a full write buffer would.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Signals sent so far as `(target, payload)`.
    #[must_use]
    pub fn sent_signals(&self) -> Vec<(String, serde_json::Value)> {
        self.sent_signals
            .lock()
            .map(|signals| signals.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignalingSink for MemorySink {
    async fn send_signal(
        &self,
        target: &str,
        signal: serde_json::Value,
    ) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Signaling("injected failure".into()));
        }
        if let Ok(mut signals) = self.sent_signals.lock() {
            signals.push((target.to_owned(), signal));
        }
        Ok(())
    }

    async fn send_relay(&self, target: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Signaling("injected failure".into()));
        }
        let route = self
            .routes_entry(target)
            .ok_or_else(|| TransportError::Signaling(format!("unknown peer {target}")))?;
        route
            .send((self.local_id.clone(), frame))
            .map_err(|_| TransportError::Signaling("receiver gone".into()))
    }
}

impl MemorySink {
    fn routes_entry(&self, target: &str) -> Option<mpsc::UnboundedSender<RelayDelivery>> {
        self.hub
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(target).cloned())
    }
}
