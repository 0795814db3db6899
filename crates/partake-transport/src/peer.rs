//! Per-peer transport: direct path with one-way relay fallback.
//!
//! A [`PeerTransport`] owns the lifecycle of one remote peer. It starts in
//! [`PeerState::Negotiating`] while the direct channel sets itself up; if the
//! channel opens within the fallback window the transport promotes to
//! [`PeerState::ConnectedDirect`], otherwise (or on any later direct failure)
//! it demotes to [`PeerState::ConnectedRelay`] and stays there. There is no
//! path back from relay to direct within a transport's lifetime.
//!
//! All frames are sealed before leaving and opened on arrival, on either
//! path. Received frames from both paths funnel into a single ordered queue
//! consumed by one worker task, so chunk reassembly never races.

use crate::channel::{ChannelEvent, DirectChannel, SignalingSink};
use crate::error::TransportError;
use partake_crypto::SessionKey;
use partake_proto::chunking::{JsonReassembler, split_json};
use partake_proto::frame::Frame;
use partake_proto::message::ControlMessage;
use rand_core::OsRng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Buffered bytes on the direct channel above which sends are queued.
pub const BUFFER_HIGH_WATER: usize = 4 * 1024 * 1024;

/// Buffered bytes below which the channel should report `BufferedLow`.
pub const BUFFER_LOW_WATER: usize = 1024 * 1024;

/// How long the direct channel gets to open before relay takes over.
pub const DIRECT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a peer transport.
#[derive(Debug, Clone, Copy)]
pub struct PeerTransportConfig {
    /// Negotiation deadline for the direct path.
    pub fallback_timeout: Duration,
    /// Send-queue threshold; see [`BUFFER_HIGH_WATER`].
    pub high_water: usize,
    /// Drain threshold channels should signal at; see [`BUFFER_LOW_WATER`].
    pub low_water: usize,
}

impl Default for PeerTransportConfig {
    fn default() -> Self {
        Self {
            fallback_timeout: DIRECT_FALLBACK_TIMEOUT,
            high_water: BUFFER_HIGH_WATER,
            low_water: BUFFER_LOW_WATER,
        }
    }
}

/// Connection state of a peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Direct channel still negotiating; frames go over relay meanwhile.
    Negotiating,
    /// Direct channel open and carrying frames.
    ConnectedDirect,
    /// Relay is the permanent path for this transport.
    ConnectedRelay,
    /// Torn down; all sends fail.
    Closed,
}

/// Decrypted, parsed traffic and lifecycle notifications from one peer.
#[derive(Debug)]
pub enum PeerEvent {
    /// The transport changed state.
    StateChanged(PeerState),
    /// A control message arrived (reassembled if it was chunked).
    Control(ControlMessage),
    /// A file chunk arrived (download direction).
    FileChunk {
        /// Logical path within the share
        path: String,
        /// Chunk index
        index: u32,
        /// Total chunks for this file
        total: u32,
        /// Chunk bytes
        data: Vec<u8>,
    },
    /// A file chunk arrived (upload direction).
    UploadChunk {
        /// Logical path within the share
        path: String,
        /// Chunk index
        index: u32,
        /// Total chunks for this file
        total: u32,
        /// Chunk bytes
        data: Vec<u8>,
    },
    /// The transport was closed locally.
    Closed,
}

type SendWaiter = oneshot::Sender<Result<(), TransportError>>;

struct SendState {
    state: PeerState,
    channel: Option<Arc<dyn DirectChannel>>,
    queue: VecDeque<(Vec<u8>, SendWaiter)>,
}

struct Shared {
    peer_id: String,
    key: SessionKey,
    sink: Arc<dyn SignalingSink>,
    events: mpsc::UnboundedSender<PeerEvent>,
    send: Mutex<SendState>,
    shutdown: watch::Sender<bool>,
    config: PeerTransportConfig,
}

/// What `demote_locked` hands back to be wound down outside the lock.
struct Demoted {
    channel: Option<Arc<dyn DirectChannel>>,
    queued: VecDeque<(Vec<u8>, SendWaiter)>,
}

/// Transport to one remote peer.
///
/// Created per peer by the client engine; dropped or [`close`](Self::close)d
/// when the peer leaves.
pub struct PeerTransport {
    shared: Arc<Shared>,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    next_message_id: AtomicU32,
}

impl PeerTransport {
    /// Build a transport and spawn its driver and receive worker.
    ///
    /// `direct` is the channel implementation plus its event stream; pass
    /// `None` for a relay-only transport (it starts in `ConnectedRelay`).
    /// The returned receiver yields every [`PeerEvent`] in arrival order.
    #[must_use]
    pub fn new(
        peer_id: impl Into<String>,
        key: SessionKey,
        direct: Option<(Arc<dyn DirectChannel>, mpsc::UnboundedReceiver<ChannelEvent>)>,
        sink: Arc<dyn SignalingSink>,
        config: PeerTransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (channel, channel_events) = match direct {
            Some((channel, events)) => (Some(channel), Some(events)),
            None => (None, None),
        };
        let initial = if channel.is_some() {
            PeerState::Negotiating
        } else {
            PeerState::ConnectedRelay
        };

        let shared = Arc::new(Shared {
            peer_id: peer_id.into(),
            key,
            sink,
            events: events_tx,
            send: Mutex::new(SendState {
                state: initial,
                channel,
                queue: VecDeque::new(),
            }),
            shutdown: shutdown_tx,
            config,
        });

        if let Some(events) = channel_events {
            tokio::spawn(run_driver(
                Arc::clone(&shared),
                events,
                incoming_tx.clone(),
                shutdown_rx.clone(),
            ));
        }
        tokio::spawn(run_worker(Arc::clone(&shared), incoming_rx, shutdown_rx));

        (
            Self {
                shared,
                incoming_tx,
                next_message_id: AtomicU32::new(0),
            },
            events_rx,
        )
    }

    /// The remote peer's identifier.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    /// Current connection state.
    pub async fn state(&self) -> PeerState {
        self.shared.send.lock().await.state
    }

    /// Seal and send a control message, chunking it if oversized.
    ///
    /// # Errors
    ///
    /// Fails when the transport is closed, sealing fails, or neither path
    /// accepts the frame.
    pub async fn send_control(&self, msg: &ControlMessage) -> Result<(), TransportError> {
        let body = msg.to_bytes()?;
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        for frame in split_json(&body, message_id) {
            self.send_frame(&frame).await?;
        }
        Ok(())
    }

    /// Seal and send one file chunk (download direction).
    ///
    /// Suspends while the direct channel is above its high watermark, which
    /// is how backpressure reaches the sending loop.
    ///
    /// # Errors
    ///
    /// Fails when the transport is closed or both paths reject the frame.
    pub async fn send_file_chunk(
        &self,
        path: &str,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.send_frame(&Frame::FileChunk {
            path: path.to_owned(),
            index,
            total,
            data,
        })
        .await
    }

    /// Seal and send one file chunk (upload direction).
    ///
    /// # Errors
    ///
    /// Fails when the transport is closed or both paths reject the frame.
    pub async fn send_upload_chunk(
        &self,
        path: &str,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.send_frame(&Frame::UploadChunk {
            path: path.to_owned(),
            index,
            total,
            data,
        })
        .await
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let sealed = self.shared.key.seal(&mut OsRng, &frame.encode())?;
        self.send_sealed(sealed).await
    }

    async fn send_sealed(&self, sealed: Vec<u8>) -> Result<(), TransportError> {
        let sealed = {
            let mut st = self.shared.send.lock().await;
            match st.state {
                PeerState::Closed => return Err(TransportError::Closed),
                PeerState::Negotiating | PeerState::ConnectedRelay => sealed,
                PeerState::ConnectedDirect => {
                    let channel = st
                        .channel
                        .clone()
                        .ok_or_else(|| TransportError::Direct("channel missing".into()))?;
                    // queue behind earlier queued frames so ordering holds
                    if !st.queue.is_empty()
                        || channel.buffered_bytes() >= self.shared.config.high_water
                    {
                        let (done_tx, done_rx) = oneshot::channel();
                        st.queue.push_back((sealed, done_tx));
                        drop(st);
                        return done_rx.await.map_err(|_| TransportError::Closed)?;
                    }
                    match channel.try_send(&sealed) {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            // direct path is done; this frame still has to
                            // go out, behind anything that was queued for it
                            let demoted = self.shared.demote_locked(&mut st, &err.to_string());
                            drop(st);
                            if let Some(demoted) = demoted {
                                self.shared.finish_demote(demoted).await;
                            }
                            sealed
                        }
                    }
                }
            }
        };
        // the lock is released here: a relay send parked on a congested
        // signaling connection must never wedge state queries or close
        self.shared.relay(sealed).await
    }

    /// Inject an encrypted frame that arrived over the relay path.
    pub async fn handle_relay_frame(&self, frame: Vec<u8>) {
        if self.incoming_tx.send(frame).await.is_err() {
            debug!(peer = %self.shared.peer_id, "relay frame after close dropped");
        }
    }

    /// Feed a remote negotiation payload to the direct channel.
    pub async fn handle_signal(&self, signal: serde_json::Value) {
        let channel = self.shared.send.lock().await.channel.clone();
        match channel {
            Some(channel) => {
                if let Err(err) = channel.apply_signal(signal).await {
                    warn!(peer = %self.shared.peer_id, %err, "negotiation signal rejected");
                }
            }
            None => debug!(peer = %self.shared.peer_id, "signal ignored, no direct channel"),
        }
    }

    /// Tear the transport down: cancel timers, fail queued sends, close the
    /// direct channel, stop both tasks. Idempotent.
    pub async fn close(&self) {
        let channel = {
            let mut st = self.shared.send.lock().await;
            if st.state == PeerState::Closed {
                return;
            }
            st.state = PeerState::Closed;
            for (_, done) in st.queue.drain(..) {
                let _ = done.send(Err(TransportError::Closed));
            }
            st.channel.take()
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        let _ = self.shared.shutdown.send(true);
        let _ = self.shared.events.send(PeerEvent::Closed);
    }
}

impl Shared {
    /// Promote from `Negotiating` to `ConnectedDirect`. A transport already
    /// on relay stays there.
    async fn promote(&self) {
        let mut st = self.send.lock().await;
        if st.state != PeerState::Negotiating {
            return;
        }
        st.state = PeerState::ConnectedDirect;
        debug!(peer = %self.peer_id, "direct path open");
        let _ = self.events.send(PeerEvent::StateChanged(PeerState::ConnectedDirect));
    }

    /// Relay one sealed frame with the send lock released. The send races
    /// the shutdown watch, so [`PeerTransport::close`] resolves a parked
    /// send with `Closed` instead of waiting for the sink.
    async fn relay(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = self.sink.send_relay(&self.peer_id, frame) => result,
            _ = shutdown.wait_for(|stopped| *stopped) => Err(TransportError::Closed),
        }
    }

    async fn demote(&self, reason: &str) {
        let demoted = {
            let mut st = self.send.lock().await;
            self.demote_locked(&mut st, reason)
        };
        if let Some(demoted) = demoted {
            self.finish_demote(demoted).await;
        }
    }

    /// Switch to relay permanently. Only flips the state; the dead channel
    /// and the queued frames come back for [`finish_demote`](Self::finish_demote)
    /// to wind down once the lock is released. `None` when already on relay
    /// or closed.
    fn demote_locked(&self, st: &mut SendState, reason: &str) -> Option<Demoted> {
        if matches!(st.state, PeerState::Closed | PeerState::ConnectedRelay) {
            return None;
        }
        st.state = PeerState::ConnectedRelay;
        debug!(peer = %self.peer_id, reason, "direct path lost, continuing over relay");
        Some(Demoted {
            channel: st.channel.take(),
            queued: std::mem::take(&mut st.queue),
        })
    }

    /// Close the dead channel and flush the frames that were queued for it
    /// over relay, in order.
    async fn finish_demote(&self, demoted: Demoted) {
        if let Some(channel) = demoted.channel {
            channel.close().await;
        }
        for (frame, done) in demoted.queued {
            let result = self.relay(frame).await;
            let _ = done.send(result);
        }
        let _ = self.events.send(PeerEvent::StateChanged(PeerState::ConnectedRelay));
    }

    /// Push queued frames onto the channel until the high watermark is hit
    /// again or the queue empties.
    async fn drain_queue(&self) {
        let demoted = {
            let mut st = self.send.lock().await;
            let Some(channel) = st.channel.clone() else {
                return;
            };
            let mut demoted = None;
            while let Some((frame, done)) = st.queue.pop_front() {
                if channel.buffered_bytes() >= self.config.high_water {
                    st.queue.push_front((frame, done));
                    break;
                }
                match channel.try_send(&frame) {
                    Ok(()) => {
                        let _ = done.send(Ok(()));
                    }
                    Err(err) => {
                        st.queue.push_front((frame, done));
                        demoted = self.demote_locked(&mut st, &err.to_string());
                        break;
                    }
                }
            }
            demoted
        };
        if let Some(demoted) = demoted {
            self.finish_demote(demoted).await;
        }
    }

    fn emit_control(&self, body: &[u8]) {
        match ControlMessage::from_bytes(body) {
            Ok(msg) => {
                let _ = self.events.send(PeerEvent::Control(msg));
            }
            Err(err) => {
                warn!(peer = %self.peer_id, %err, "dropping malformed control message");
            }
        }
    }
}

/// Owns the channel event stream, the fallback timer, and queue draining.
async fn run_driver(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    incoming: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let timer = tokio::time::sleep(shared.config.fallback_timeout);
    tokio::pin!(timer);
    let mut waiting_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = &mut timer, if waiting_open => {
                waiting_open = false;
                shared.demote("direct path did not open in time").await;
            }
            ev = events.recv() => match ev {
                Some(ChannelEvent::Open) => {
                    waiting_open = false;
                    shared.promote().await;
                }
                Some(ChannelEvent::Message(raw)) => {
                    if incoming.send(raw).await.is_err() {
                        break;
                    }
                }
                Some(ChannelEvent::BufferedLow) => shared.drain_queue().await,
                Some(ChannelEvent::Signal(signal)) => {
                    if let Err(err) = shared.sink.send_signal(&shared.peer_id, signal).await {
                        warn!(peer = %shared.peer_id, %err, "failed to forward negotiation signal");
                    }
                }
                Some(ChannelEvent::Error(reason)) => {
                    waiting_open = false;
                    shared.demote(&reason).await;
                }
                Some(ChannelEvent::Closed) | None => {
                    shared.demote("direct channel closed").await;
                    break;
                }
            },
        }
    }
}

/// Single receive worker: decrypts, parses, reassembles, emits.
///
/// Frames from the direct channel and the relay path arrive through the same
/// queue, so everything downstream sees one ordered stream.
async fn run_worker(
    shared: Arc<Shared>,
    mut incoming: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reassembler = JsonReassembler::new();
    loop {
        let raw = tokio::select! {
            _ = shutdown.changed() => break,
            raw = incoming.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        reassembler.evict_expired();

        let plain = match shared.key.open(&raw) {
            Ok(plain) => plain,
            Err(err) => {
                warn!(peer = %shared.peer_id, %err, "dropping undecryptable frame");
                continue;
            }
        };
        let frame = match Frame::parse(&plain) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(peer = %shared.peer_id, %err, "dropping unparseable frame");
                continue;
            }
        };
        match frame {
            Frame::Json(body) => shared.emit_control(&body),
            Frame::JsonChunk {
                message_id,
                index,
                total,
                data,
            } => match reassembler.insert(message_id, index, total, data) {
                Ok(Some(body)) => shared.emit_control(&body),
                Ok(None) => {}
                Err(err) => {
                    warn!(peer = %shared.peer_id, %err, "dropping bad json fragment");
                }
            },
            Frame::FileChunk {
                path,
                index,
                total,
                data,
            } => {
                let _ = shared.events.send(PeerEvent::FileChunk {
                    path,
                    index,
                    total,
                    data,
                });
            }
            Frame::UploadChunk {
                path,
                index,
                total,
                data,
            } => {
                let _ = shared.events.send(PeerEvent::UploadChunk {
                    path,
                    index,
                    total,
                    data,
                });
            }
        }
    }
    reassembler.clear();
}
