//! End-to-end transfer over peer transports, including mid-transfer
//! fallback from the direct channel to the relay.

use partake_client::DownloadManager;
use partake_client::fsio;
use partake_crypto::{SessionKey, TagBuilder, TransferNonce, derive_transfer_key};
use partake_proto::{CHUNK_SIZE, ControlMessage, chunk_count};
use partake_transport::testing::{MemoryHub, RelayDelivery};
use partake_transport::{PeerEvent, PeerState, PeerTransport, PeerTransportConfig};
use rand_core::OsRng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const FILE_SIZE: usize = 10 * 1024 * 1024;

fn deterministic_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push((i % 251) as u8 ^ (i / CHUNK_SIZE) as u8);
    }
    out
}

fn pump_relay(transport: Arc<PeerTransport>, mut deliveries: mpsc::UnboundedReceiver<RelayDelivery>) {
    tokio::spawn(async move {
        while let Some((_, frame)) = deliveries.recv().await {
            transport.handle_relay_frame(frame).await;
        }
    });
}

async fn serve_one_file(
    transport: &PeerTransport,
    key: &SessionKey,
    root: &Path,
    path: &str,
    size: u64,
    fail_direct_at: Option<(u32, &partake_transport::testing::MemoryChannel)>,
) {
    let total = chunk_count(size);
    let nonce = TransferNonce::generate(&mut OsRng);
    let mac_key = derive_transfer_key(key, &nonce);
    let mut tag = TagBuilder::new(&mac_key);
    for index in 0..total {
        if let Some((at, channel)) = fail_direct_at
            && index == at
        {
            channel.fail_sends();
        }
        let data = fsio::read_chunk(root, path, index).await.expect("read chunk");
        tag.update(&data);
        transport
            .send_file_chunk(path, index, total, data)
            .await
            .expect("send chunk");
    }
    transport
        .send_control(&ControlMessage::FileComplete {
            path: path.to_owned(),
            name: path.to_owned(),
            size,
            nonce: nonce.to_base64(),
            hmac: tag.finalize().to_base64(),
        })
        .await
        .expect("send complete");
}

/// A 160-chunk file survives the direct channel dying mid-stream: the host
/// transport falls back to relay and the guest's reassembly and integrity
/// check never notice.
#[tokio::test]
async fn test_large_transfer_survives_direct_failure() {
    let body = async {
        let share = tempfile::tempdir().expect("share dir");
        let out = tempfile::tempdir().expect("out dir");
        let original = deterministic_bytes(FILE_SIZE);
        std::fs::write(share.path().join("big.bin"), &original).expect("write share file");

        let key = SessionKey::generate(&mut OsRng);
        let hub = MemoryHub::new();
        let to_host = hub.register("host");
        let to_guest = hub.register("guest");
        let ((host_ch, host_rx), (guest_ch, guest_rx)) =
            partake_transport::testing::MemoryChannel::pair();

        let (host, mut host_events) = PeerTransport::new(
            "guest",
            key.clone(),
            Some((host_ch.clone(), host_rx)),
            hub.sink("host"),
            PeerTransportConfig::default(),
        );
        let (guest, mut guest_events) = PeerTransport::new(
            "host",
            key.clone(),
            Some((guest_ch, guest_rx)),
            hub.sink("guest"),
            PeerTransportConfig::default(),
        );
        let host = Arc::new(host);
        let guest = Arc::new(guest);
        pump_relay(Arc::clone(&host), to_host);
        pump_relay(Arc::clone(&guest), to_guest);

        // guest asks for the file over its own (still healthy) path
        guest
            .send_control(&ControlMessage::FileRequest {
                path: "big.bin".into(),
            })
            .await
            .expect("send request");

        let share_root = share.path().to_owned();
        let host_key = key.clone();
        let host_task = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                loop {
                    match host_events.recv().await.expect("host events ended") {
                        PeerEvent::Control(ControlMessage::FileRequest { path }) => {
                            serve_one_file(
                                &host,
                                &host_key,
                                &share_root,
                                &path,
                                FILE_SIZE as u64,
                                Some((80, host_ch.as_ref())),
                            )
                            .await;
                            return;
                        }
                        _ => continue,
                    }
                }
            })
        };

        let downloads = DownloadManager::new();
        downloads
            .begin("big.bin", FILE_SIZE as u64)
            .expect("register download");

        let mut chunks_seen = 0u32;
        let saved = loop {
            match guest_events.recv().await.expect("guest events ended") {
                PeerEvent::FileChunk {
                    path,
                    index,
                    total,
                    data,
                } => {
                    assert_eq!(total, 160);
                    chunks_seen += 1;
                    downloads
                        .accept_chunk(&path, index, total, data)
                        .expect("accept chunk");
                }
                PeerEvent::Control(ControlMessage::FileComplete {
                    path, nonce, hmac, ..
                }) => {
                    let bytes = downloads
                        .complete(&key, &path, &nonce, &hmac)
                        .expect("verify download");
                    break fsio::write_atomic(out.path(), &path, bytes)
                        .await
                        .expect("persist");
                }
                _ => continue,
            }
        };

        host_task.await.expect("host task");
        assert_eq!(chunks_seen, 160);
        assert_eq!(std::fs::read(&saved).expect("read saved"), original);

        // fallback is one-way: the sender that lost its channel moved to
        // relay, the other side keeps its direct path
        assert_eq!(host.state().await, PeerState::ConnectedRelay);
        assert_eq!(guest.state().await, PeerState::ConnectedDirect);

        host.close().await;
        guest.close().await;
    };
    tokio::time::timeout(Duration::from_secs(60), body)
        .await
        .expect("test timed out");
}

/// A transport with no direct channel at all serves transfers over relay
/// from the first frame.
#[tokio::test]
async fn test_relay_only_transfer() {
    let body = async {
        let share = tempfile::tempdir().expect("share dir");
        let out = tempfile::tempdir().expect("out dir");
        let original = deterministic_bytes(3 * CHUNK_SIZE + 17);
        std::fs::write(share.path().join("doc.pdf"), &original).expect("write share file");

        let key = SessionKey::generate(&mut OsRng);
        let hub = MemoryHub::new();
        let to_host = hub.register("host");
        let to_guest = hub.register("guest");

        let (host, _host_events) = PeerTransport::new(
            "guest",
            key.clone(),
            None,
            hub.sink("host"),
            PeerTransportConfig::default(),
        );
        let (guest, mut guest_events) = PeerTransport::new(
            "host",
            key.clone(),
            None,
            hub.sink("guest"),
            PeerTransportConfig::default(),
        );
        let host = Arc::new(host);
        let guest = Arc::new(guest);
        pump_relay(Arc::clone(&host), to_host);
        pump_relay(Arc::clone(&guest), to_guest);
        assert_eq!(host.state().await, PeerState::ConnectedRelay);

        serve_one_file(
            &host,
            &key,
            share.path(),
            "doc.pdf",
            original.len() as u64,
            None,
        )
        .await;

        let downloads = DownloadManager::new();
        downloads
            .begin("doc.pdf", original.len() as u64)
            .expect("register download");
        let saved = loop {
            match guest_events.recv().await.expect("guest events ended") {
                PeerEvent::FileChunk {
                    path,
                    index,
                    total,
                    data,
                } => {
                    downloads
                        .accept_chunk(&path, index, total, data)
                        .expect("accept chunk");
                }
                PeerEvent::Control(ControlMessage::FileComplete {
                    path, nonce, hmac, ..
                }) => {
                    let bytes = downloads
                        .complete(&key, &path, &nonce, &hmac)
                        .expect("verify download");
                    break fsio::write_atomic(out.path(), &path, bytes)
                        .await
                        .expect("persist");
                }
                _ => continue,
            }
        };
        assert_eq!(std::fs::read(&saved).expect("read saved"), original);

        host.close().await;
        guest.close().await;
    };
    tokio::time::timeout(Duration::from_secs(30), body)
        .await
        .expect("test timed out");
}

/// A flipped bit anywhere in the stream fails the whole-file check and
/// nothing is persisted.
#[tokio::test]
async fn test_corrupted_stream_rejected() {
    let key = SessionKey::generate(&mut OsRng);
    let original = deterministic_bytes(CHUNK_SIZE + 5);
    let nonce = TransferNonce::generate(&mut OsRng);
    let mac_key = derive_transfer_key(&key, &nonce);
    let mut tag = TagBuilder::new(&mac_key);
    tag.update(&original);
    let hmac = tag.finalize().to_base64();

    let downloads = DownloadManager::new();
    downloads
        .begin("f.bin", original.len() as u64)
        .expect("register");
    let mut tampered = original.clone();
    tampered[CHUNK_SIZE + 1] ^= 0x01;
    downloads
        .accept_chunk("f.bin", 0, 2, tampered[..CHUNK_SIZE].to_vec())
        .expect("chunk 0");
    downloads
        .accept_chunk("f.bin", 1, 2, tampered[CHUNK_SIZE..].to_vec())
        .expect("chunk 1");
    let err = downloads
        .complete(&key, "f.bin", &nonce.to_base64(), &hmac)
        .expect_err("must reject");
    assert!(
        matches!(err, partake_client::ClientError::Integrity(_)),
        "got {err}"
    );
    assert!(!downloads.is_pending("f.bin"));
}
