//! WebSocket signaling client.
//!
//! One connection per room. Text frames carry [`SignalMessage`]s, binary
//! frames carry relay envelopes. The writer side is a bounded queue drained
//! by a dedicated task, so relay senders suspend instead of growing an
//! unbounded buffer when the socket is slow.

use crate::channel::SignalingSink;
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use partake_proto::message::SignalMessage;
use partake_proto::relay::RelayEnvelope;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Writer queue depth; full means relay senders wait their turn.
const SEND_BUFFER: usize = 64;

/// Events from the signaling connection, in arrival order.
#[derive(Debug)]
pub enum SignalingEvent {
    /// The server assigned this connection its peer id.
    Assigned {
        /// Our identity in the room
        peer_id: String,
    },
    /// Another peer entered the room.
    PeerJoined {
        /// The peer's identifier
        peer_id: String,
    },
    /// A peer left the room.
    PeerLeft {
        /// The peer's identifier
        peer_id: String,
    },
    /// Negotiation payload from a peer.
    Signal {
        /// Originating peer
        from: String,
        /// Opaque negotiation payload
        payload: serde_json::Value,
    },
    /// Encrypted relay frame from a peer.
    Relay {
        /// Originating peer
        from: String,
        /// Sealed frame bytes
        frame: Vec<u8>,
    },
    /// The room lives on another server instance; reconnect there.
    Redirected {
        /// Identifier of the owning instance
        instance: String,
    },
    /// The server rejected something, usually the join.
    ServerError {
        /// Human-readable reason
        message: String,
    },
    /// The connection ended.
    Closed,
}

/// Client half of the signaling connection.
///
/// Cheap to clone; all clones share the writer queue.
#[derive(Clone)]
pub struct SignalingClient {
    out: mpsc::Sender<Message>,
}

impl SignalingClient {
    /// Connect to the signaling server and join `room`.
    ///
    /// Spawns the reader and writer tasks; the returned receiver yields
    /// every [`SignalingEvent`], ending with [`SignalingEvent::Closed`].
    ///
    /// # Errors
    ///
    /// Fails when the WebSocket connection cannot be established or the
    /// join message cannot be serialized.
    pub async fn connect(
        url: &str,
        room: &str,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>), TransportError> {
        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(SEND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(SEND_BUFFER);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(err) = write.send(msg).await {
                    debug!(%err, "signaling write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                        Ok(parsed) => {
                            let Some(event) = translate(parsed) else {
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!(%err, "ignoring malformed signaling message"),
                    },
                    Ok(Message::Binary(bin)) => match RelayEnvelope::parse(&bin) {
                        Ok(envelope) => {
                            let event = SignalingEvent::Relay {
                                from: envelope.peer_id,
                                frame: envelope.payload,
                            };
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!(%err, "ignoring malformed relay envelope"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(%err, "signaling read failed");
                        break;
                    }
                }
            }
            let _ = event_tx.send(SignalingEvent::Closed).await;
        });

        let client = Self { out: out_tx };
        client
            .send(&SignalMessage::Join {
                room: room.to_owned(),
            })
            .await?;
        Ok((client, event_rx))
    }

    /// Send one signaling message.
    ///
    /// # Errors
    ///
    /// Fails when the connection is gone or serialization fails.
    pub async fn send(&self, msg: &SignalMessage) -> Result<(), TransportError> {
        let text = msg.to_json()?;
        self.out
            .send(Message::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Close the connection cleanly.
    pub async fn close(&self) {
        let _ = self.out.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl SignalingSink for SignalingClient {
    async fn send_signal(
        &self,
        target: &str,
        signal: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.send(&SignalMessage::Signal {
            target_peer_id: Some(target.to_owned()),
            from_peer_id: None,
            signal,
        })
        .await
    }

    async fn send_relay(&self, target: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let bytes = RelayEnvelope::new(target, frame).encode();
        self.out
            .send(Message::Binary(bytes))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

fn translate(msg: SignalMessage) -> Option<SignalingEvent> {
    match msg {
        SignalMessage::PeerId { peer_id } => Some(SignalingEvent::Assigned { peer_id }),
        SignalMessage::PeerJoined { peer_id } => Some(SignalingEvent::PeerJoined { peer_id }),
        SignalMessage::PeerLeft { peer_id } => Some(SignalingEvent::PeerLeft { peer_id }),
        SignalMessage::Signal {
            from_peer_id: Some(from),
            signal,
            ..
        } => Some(SignalingEvent::Signal {
            from,
            payload: signal,
        }),
        SignalMessage::Signal {
            from_peer_id: None, ..
        } => {
            warn!("ignoring signal without a sender");
            None
        }
        SignalMessage::Redirect { instance } => Some(SignalingEvent::Redirected { instance }),
        SignalMessage::Error { message } => Some(SignalingEvent::ServerError { message }),
        SignalMessage::Join { .. } => {
            warn!("ignoring join echoed by the server");
            None
        }
    }
}
