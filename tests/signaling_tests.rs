//! Signaling server round trips over real sockets.

use partake_proto::{RelayEnvelope, SignalMessage};
use partake_test_support::{WsClient, spawn_server};
use serde_json::json;

#[tokio::test]
async fn test_join_assigns_ids_and_announces_both_ways() {
    let addr = spawn_server("test", None).await;

    let (mut alice, alice_id) = WsClient::join(addr, "room1").await;
    let (mut bob, bob_id) = WsClient::join(addr, "room1").await;
    assert_ne!(alice_id, bob_id);

    // the earlier peer hears about the newcomer, the newcomer hears about
    // everyone already present
    assert_eq!(
        alice.next_signal().await,
        SignalMessage::PeerJoined {
            peer_id: bob_id.clone()
        }
    );
    assert_eq!(
        bob.next_signal().await,
        SignalMessage::PeerJoined {
            peer_id: alice_id.clone()
        }
    );
}

#[tokio::test]
async fn test_signal_forwarding_rewrites_sender() {
    let addr = spawn_server("test", None).await;
    let (mut alice, alice_id) = WsClient::join(addr, "room2").await;
    let (mut bob, bob_id) = WsClient::join(addr, "room2").await;
    let _ = alice.next_signal().await; // bob's join
    let _ = bob.next_signal().await; // alice's presence

    let payload = json!({"sdp": "offer", "seq": 1});
    alice
        .send(&SignalMessage::Signal {
            target_peer_id: Some(bob_id.clone()),
            from_peer_id: None,
            signal: payload.clone(),
        })
        .await;

    match bob.next_signal().await {
        SignalMessage::Signal {
            target_peer_id,
            from_peer_id,
            signal,
        } => {
            assert_eq!(target_peer_id, None);
            assert_eq!(from_peer_id.as_deref(), Some(alice_id.as_str()));
            assert_eq!(signal, payload);
        }
        other => panic!("expected forwarded signal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_binary_relay_reframed_with_sender_id() {
    let addr = spawn_server("test", None).await;
    let (mut alice, alice_id) = WsClient::join(addr, "room3").await;
    let (mut bob, bob_id) = WsClient::join(addr, "room3").await;
    let _ = alice.next_signal().await;
    let _ = bob.next_signal().await;

    let ciphertext = vec![0xAB; 2048];
    alice
        .send_binary(RelayEnvelope::new(bob_id.clone(), ciphertext.clone()).encode())
        .await;

    let delivered = RelayEnvelope::parse(&bob.next_binary().await).expect("parse envelope");
    assert_eq!(delivered.peer_id, alice_id);
    assert_eq!(delivered.payload, ciphertext);

    // a relay addressed to a spoofed/absent target is silently dropped and
    // the connection keeps working
    alice
        .send_binary(RelayEnvelope::new("nobody", vec![1, 2, 3]).encode())
        .await;
    alice
        .send_binary(RelayEnvelope::new(bob_id, vec![7; 8]).encode())
        .await;
    let delivered = RelayEnvelope::parse(&bob.next_binary().await).expect("parse envelope");
    assert_eq!(delivered.payload, vec![7; 8]);
}

#[tokio::test]
async fn test_peer_left_broadcast() {
    let addr = spawn_server("test", None).await;
    let (mut alice, _alice_id) = WsClient::join(addr, "room4").await;
    let (bob, bob_id) = WsClient::join(addr, "room4").await;
    let _ = alice.next_signal().await;

    drop(bob);
    assert_eq!(
        alice.next_signal().await,
        SignalMessage::PeerLeft { peer_id: bob_id }
    );
}

#[tokio::test]
async fn test_bad_room_id_is_refused() {
    let addr = spawn_server("test", None).await;
    let mut client = WsClient::connect(addr).await;
    client
        .send(&SignalMessage::Join {
            room: "not a room!".to_owned(),
        })
        .await;
    match client.next_signal().await {
        SignalMessage::Error { message } => assert!(message.contains("room")),
        other => panic!("expected error, got {other:?}"),
    }
    client.expect_close().await;
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let addr = spawn_server("test", None).await;
    let (mut alice, alice_id) = WsClient::join(addr, "left").await;
    let (mut bob, _bob_id) = WsClient::join(addr, "right").await;

    // alice must not hear about bob; a third peer in her room is the next
    // thing she sees
    let (_carol, carol_id) = WsClient::join(addr, "left").await;
    assert_eq!(
        alice.next_signal().await,
        SignalMessage::PeerJoined { peer_id: carol_id }
    );

    // bob's relay to a peer in the other room goes nowhere
    bob.send_binary(RelayEnvelope::new(alice_id, vec![1]).encode())
        .await;
}
