//! One client connection's lifecycle.
//!
//! Every connection runs two tasks: a reader driving the protocol below and
//! a writer draining the connection's bounded outbound channel. All traffic
//! to a peer goes through that channel, so room broadcasts never block on a
//! slow socket.
//!
//! Protocol violations are handled by severity: failures at join time
//! (bad room id, full room, foreign room) get an explanatory message and a
//! close, while violations on an established connection (oversized relay,
//! blown budget, unparseable message) are silently dropped. An attacker
//! learns nothing from drops, and a buggy client keeps its working streams.

use crate::coordinator::{Coordinator, RoomOwnership};
use crate::limits::{ConnectionBudget, MAX_RELAY_MESSAGE};
use crate::rooms::{Registry, Room};
use futures_util::{SinkExt, StreamExt};
use partake_crypto::random;
use partake_proto::{RelayEnvelope, SignalMessage, valid_room_id};
use rand_core::OsRng;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound messages queued per connection before drops begin.
const OUTBOUND_BUFFER: usize = 256;

/// Shared server state handed to every connection.
pub struct ServerState {
    /// Room membership on this instance
    pub registry: Registry,
    /// Cross-instance room ownership
    pub coordinator: Arc<Coordinator>,
}

struct Membership {
    room_id: String,
    room: Arc<Room>,
    peer_id: String,
}

/// Drive one accepted TCP connection to completion.
pub async fn handle_connection(state: Arc<ServerState>, stream: TcpStream) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%err, "websocket handshake failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut budget = ConnectionBudget::new();
    let mut membership: Option<Membership> = None;

    while let Some(incoming) = read.next().await {
        let message = match incoming {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, "read error, dropping connection");
                break;
            }
        };
        if !budget.allow_message() {
            continue;
        }
        match message {
            Message::Text(text) => {
                if handle_text(&state, &outbound, &mut membership, &mut budget, &text)
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Message::Binary(raw) => handle_relay(&membership, &mut budget, raw),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    if let Some(membership) = membership.take() {
        depart(&state, &membership).await;
    }
    drop(outbound);
    let _ = writer.await;
}

async fn handle_text(
    state: &Arc<ServerState>,
    outbound: &mpsc::Sender<Message>,
    membership: &mut Option<Membership>,
    budget: &mut ConnectionBudget,
    text: &str,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    let message = match SignalMessage::from_json(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "unparseable signal message dropped");
            return ControlFlow::Continue(());
        }
    };
    match message {
        SignalMessage::Join { room } => {
            if membership.is_some() {
                debug!("duplicate join dropped");
                return ControlFlow::Continue(());
            }
            match join_room(state, outbound, &room).await {
                Ok(joined) => {
                    *membership = Some(joined);
                    ControlFlow::Continue(())
                }
                Err(()) => ControlFlow::Break(()),
            }
        }
        SignalMessage::Signal {
            target_peer_id: Some(target),
            signal,
            ..
        } => {
            if let Some(membership) = membership {
                forward_signal(membership, budget, &target, signal);
            }
            ControlFlow::Continue(())
        }
        other => {
            debug!(?other, "unexpected signal message dropped");
            ControlFlow::Continue(())
        }
    }
}

/// Run the join handshake. `Err(())` means the connection must close.
async fn join_room(
    state: &Arc<ServerState>,
    outbound: &mpsc::Sender<Message>,
    room_id: &str,
) -> Result<Membership, ()> {
    if !valid_room_id(room_id) {
        send_and_close(outbound, error_message("invalid room id")).await;
        return Err(());
    }
    if let RoomOwnership::Foreign(owner) = state.coordinator.acquire(room_id).await {
        info!(room_id, owner, "redirecting to owning instance");
        let redirect = SignalMessage::Redirect { instance: owner };
        send_and_close(outbound, redirect).await;
        return Err(());
    }

    let peer_id = random::peer_id(&mut OsRng);
    let room = match state.registry.join(room_id, &peer_id, outbound.clone()) {
        Ok(room) => room,
        Err(refusal) => {
            warn!(room_id, ?refusal, "join refused");
            send_and_close(outbound, error_message(refusal.message())).await;
            return Err(());
        }
    };

    send_signal(outbound, &SignalMessage::PeerId {
        peer_id: peer_id.clone(),
    });
    // announce in both directions: existing peers learn of us, we learn
    // of each existing peer
    let joined = SignalMessage::PeerJoined {
        peer_id: peer_id.clone(),
    };
    if let Ok(json) = joined.to_json() {
        room.broadcast_except(&peer_id, &Message::Text(json));
    }
    for existing in room.peer_ids() {
        if existing != peer_id {
            send_signal(outbound, &SignalMessage::PeerJoined { peer_id: existing });
        }
    }

    info!(room_id, peer_id, peers = room.len(), "peer joined");
    Ok(Membership {
        room_id: room_id.to_owned(),
        room,
        peer_id,
    })
}

fn forward_signal(
    membership: &Membership,
    budget: &mut ConnectionBudget,
    target: &str,
    signal: serde_json::Value,
) {
    // count forwarded payloads against the relay budget too
    if !budget.allow_relay(signal.to_string().len()) {
        return;
    }
    let forwarded = SignalMessage::Signal {
        target_peer_id: None,
        from_peer_id: Some(membership.peer_id.clone()),
        signal,
    };
    if let Ok(json) = forwarded.to_json() {
        membership.room.send_to(target, Message::Text(json));
    }
}

fn handle_relay(membership: &Option<Membership>, budget: &mut ConnectionBudget, raw: Vec<u8>) {
    let Some(membership) = membership else {
        debug!("binary message before join dropped");
        return;
    };
    if raw.len() > MAX_RELAY_MESSAGE || !budget.allow_relay(raw.len()) {
        debug!(len = raw.len(), "relay message over budget dropped");
        return;
    }
    let envelope = match RelayEnvelope::parse(&raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "malformed relay envelope dropped");
            return;
        }
    };
    // re-frame with the sender's id so identity cannot be spoofed
    let reframed = RelayEnvelope::new(membership.peer_id.clone(), envelope.payload);
    membership
        .room
        .send_to(&envelope.peer_id, Message::Binary(reframed.encode()));
}

async fn depart(state: &Arc<ServerState>, membership: &Membership) {
    let left = SignalMessage::PeerLeft {
        peer_id: membership.peer_id.clone(),
    };
    if let Ok(json) = left.to_json() {
        membership
            .room
            .broadcast_except(&membership.peer_id, &Message::Text(json));
    }
    let destroyed = state.registry.leave(&membership.room_id, &membership.peer_id);
    info!(
        room_id = membership.room_id,
        peer_id = membership.peer_id,
        "peer left"
    );
    if destroyed {
        state.coordinator.release(&membership.room_id).await;
    }
}

fn error_message(message: &str) -> SignalMessage {
    SignalMessage::Error {
        message: message.to_owned(),
    }
}

fn send_signal(outbound: &mpsc::Sender<Message>, message: &SignalMessage) {
    if let Ok(json) = message.to_json()
        && outbound.try_send(Message::Text(json)).is_err()
    {
        warn!("outbound channel full during handshake");
    }
}

async fn send_and_close(outbound: &mpsc::Sender<Message>, message: SignalMessage) {
    if let Ok(json) = message.to_json() {
        let _ = outbound.send(Message::Text(json)).await;
    }
    let _ = outbound.send(Message::Close(None)).await;
}
