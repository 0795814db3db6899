//! Session engine: wires the signaling connection, per-peer transports, and
//! the transfer managers into a running host or guest session.
//!
//! The engine owns one task per concern: a signaling loop that creates and
//! retires peer transports, one event loop per peer, and (for hosts) a
//! periodic share re-scan. All cross-task state lives in the managers, which
//! are internally synchronized.

use crate::downloads::{DownloadManager, FOLDER_FANOUT, FanOut};
use crate::error::ClientError;
use crate::fsio::{self, MAX_SHARE_FILES};
use crate::link::ShareLink;
use crate::paths::validate_request_path;
use crate::rate_limit::{DOWNLOAD_RATE_LIMIT, RequestLimiter, UPLOAD_RATE_LIMIT};
use crate::uploads::UploadManager;
use dashmap::DashMap;
use partake_crypto::{SessionKey, TagBuilder, TransferNonce, derive_transfer_key};
use partake_proto::message::{ControlMessage, FileEntry};
use partake_proto::{MAX_FILE_SIZE, chunk_count};
use partake_transport::{
    ChannelEvent, DirectChannel, PeerEvent, PeerTransport, PeerTransportConfig, SignalingClient,
    SignalingEvent, SignalingSink,
};
use rand_core::OsRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often a host re-scans the share for changes.
const RESCAN_INTERVAL: Duration = Duration::from_secs(30);

/// How often stale upload records are swept.
const UPLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Supplies direct channels for newly seen peers.
///
/// Returning `None` leaves that peer on relay for its whole lifetime, which
/// is also what happens when no factory is configured at all.
pub trait ChannelFactory: Send + Sync {
    /// Create the direct channel toward `peer_id`. Guests initiate, hosts
    /// answer.
    fn create(
        &self,
        peer_id: &str,
        initiator: bool,
    ) -> Option<(
        Arc<dyn DirectChannel>,
        mpsc::UnboundedReceiver<ChannelEvent>,
    )>;
}

/// Progress and lifecycle notifications for the embedding application.
#[derive(Debug)]
pub enum ClientEvent {
    /// The server assigned us a peer id.
    Connected {
        /// Our identity in the room
        peer_id: String,
    },
    /// A peer entered the room.
    PeerJoined(String),
    /// A peer left the room.
    PeerLeft(String),
    /// A file list arrived from the host.
    FileList {
        /// Entries in the share
        files: Vec<FileEntry>,
        /// Whether the host accepts uploads
        allow_write: bool,
    },
    /// A download advanced by one chunk.
    DownloadProgress {
        /// Share-relative path
        path: String,
        /// Chunks on hand
        received: u32,
        /// Chunks declared
        total: u32,
    },
    /// A downloaded file verified and was written.
    FileSaved {
        /// Share-relative path
        path: String,
        /// Where it landed on disk
        location: PathBuf,
    },
    /// An upload from a peer verified and was written.
    UploadStored {
        /// The uploading peer
        peer: String,
        /// Share-relative path
        path: String,
    },
    /// A transfer failed; nothing was persisted.
    TransferFailed {
        /// Share-relative path
        path: String,
        /// What went wrong
        reason: String,
    },
    /// The room is owned by another server instance; reconnect there.
    Redirected {
        /// Identifier of the owning instance
        instance: String,
    },
    /// The server refused us.
    ServerRejected {
        /// Human-readable reason
        message: String,
    },
    /// Every queued download finished (or failed).
    AllDownloadsDone,
    /// The signaling connection ended.
    Disconnected,
}

/// Options for hosting a share.
pub struct HostOptions {
    /// Signaling server URL (`ws://…`)
    pub server_url: String,
    /// Folder to share
    pub root: PathBuf,
    /// Accept uploads from peers
    pub allow_write: bool,
    /// Direct channel supplier, if any
    pub factory: Option<Arc<dyn ChannelFactory>>,
}

/// Options for joining a share.
pub struct JoinOptions {
    /// Signaling server URL (`ws://…`)
    pub server_url: String,
    /// Pasted share link
    pub link: ShareLink,
    /// Where downloads land
    pub output: PathBuf,
    /// Download just this path instead of the whole share
    pub file: Option<String>,
    /// Direct channel supplier, if any
    pub factory: Option<Arc<dyn ChannelFactory>>,
}

enum Role {
    Host { root: PathBuf, allow_write: bool },
    Guest { output: PathBuf, want: Option<String> },
}

struct Inner {
    role: Role,
    key: SessionKey,
    signaling: SignalingClient,
    factory: Option<Arc<dyn ChannelFactory>>,
    peers: DashMap<String, Arc<PeerTransport>>,
    downloads: DownloadManager,
    uploads: UploadManager,
    download_limiter: RequestLimiter,
    upload_limiter: RequestLimiter,
    fanout: Mutex<FanOut>,
    /// Guest: latest announced share. Host: last broadcast listing.
    files: Mutex<HashMap<String, FileEntry>>,
    /// Guest: the peer whose file list we act on.
    host_peer: Mutex<Option<String>>,
    downloads_started: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// A running host or guest session.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Share `root`: generate a fresh link, join its room, serve requests.
    ///
    /// # Errors
    ///
    /// Fails when the signaling connection cannot be established.
    pub async fn host(
        opts: HostOptions,
    ) -> Result<(Self, ShareLink, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let link = ShareLink::generate(&mut OsRng);
        let role = Role::Host {
            root: opts.root,
            allow_write: opts.allow_write,
        };
        let (session, events) =
            Self::start(role, &link, &opts.server_url, opts.factory).await?;
        Ok((session, link, events))
    }

    /// Join the room named by `link` and download per the options.
    ///
    /// # Errors
    ///
    /// Fails when the signaling connection cannot be established.
    pub async fn join(
        opts: JoinOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let role = Role::Guest {
            output: opts.output,
            want: opts.file,
        };
        Self::start(role, &opts.link, &opts.server_url, opts.factory).await
    }

    async fn start(
        role: Role,
        link: &ShareLink,
        server_url: &str,
        factory: Option<Arc<dyn ChannelFactory>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let (signaling, signal_events) = SignalingClient::connect(server_url, &link.room).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let is_host = matches!(role, Role::Host { .. });
        let inner = Arc::new(Inner {
            role,
            key: link.key.clone(),
            signaling,
            factory,
            peers: DashMap::new(),
            downloads: DownloadManager::new(),
            uploads: UploadManager::new(),
            download_limiter: RequestLimiter::new(DOWNLOAD_RATE_LIMIT),
            upload_limiter: RequestLimiter::new(UPLOAD_RATE_LIMIT),
            fanout: Mutex::new(FanOut::new(FOLDER_FANOUT)),
            files: Mutex::new(HashMap::new()),
            host_peer: Mutex::new(None),
            downloads_started: AtomicBool::new(false),
            events: events_tx,
        });

        tokio::spawn(run_signaling(Arc::clone(&inner), signal_events));
        if is_host {
            tokio::spawn(run_rescan(Arc::clone(&inner)));
            tokio::spawn(run_upload_sweep(Arc::clone(&inner)));
        }
        Ok((Self { inner }, events_rx))
    }

    /// Disconnect from the room and tear down every peer transport.
    pub async fn close(&self) {
        for entry in self.inner.peers.iter() {
            entry.value().close().await;
        }
        self.inner.peers.clear();
        self.inner.signaling.close().await;
    }
}

async fn run_signaling(inner: Arc<Inner>, mut events: mpsc::Receiver<SignalingEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SignalingEvent::Assigned { peer_id } => {
                info!(peer_id, "joined room");
                inner.emit(ClientEvent::Connected { peer_id });
            }
            SignalingEvent::PeerJoined { peer_id } => {
                add_peer(&inner, &peer_id);
                inner.emit(ClientEvent::PeerJoined(peer_id));
            }
            SignalingEvent::PeerLeft { peer_id } => {
                inner.remove_peer(&peer_id).await;
                inner.emit(ClientEvent::PeerLeft(peer_id));
            }
            SignalingEvent::Signal { from, payload } => {
                if let Some(transport) = inner.peers.get(&from).map(|e| Arc::clone(e.value())) {
                    transport.handle_signal(payload).await;
                } else {
                    debug!(from, "signal from unknown peer dropped");
                }
            }
            SignalingEvent::Relay { from, frame } => {
                // relay traffic can beat the peer-joined notification
                let transport = add_peer(&inner, &from);
                transport.handle_relay_frame(frame).await;
            }
            SignalingEvent::Redirected { instance } => {
                warn!(instance, "room owned by another instance");
                inner.emit(ClientEvent::Redirected { instance });
                break;
            }
            SignalingEvent::ServerError { message } => {
                warn!(message, "server rejected us");
                inner.emit(ClientEvent::ServerRejected { message });
            }
            SignalingEvent::Closed => break,
        }
    }
    for entry in inner.peers.iter() {
        entry.value().close().await;
    }
    inner.peers.clear();
    inner.emit(ClientEvent::Disconnected);
}

/// Host: watch the share and re-broadcast the listing when it changes.
async fn run_rescan(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(RESCAN_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Role::Host { root, allow_write } = &inner.role else {
            return;
        };
        let entries = fsio::list_entries(root).await;
        let changed = {
            let Ok(mut files) = inner.files.lock() else {
                return;
            };
            let fresh: HashMap<String, FileEntry> = entries
                .iter()
                .map(|e| (e.path.clone(), e.clone()))
                .collect();
            if *files == fresh {
                false
            } else {
                *files = fresh;
                true
            }
        };
        if changed {
            debug!(files = entries.len(), "share changed, re-broadcasting list");
            let msg = ControlMessage::FileList {
                files: entries,
                allow_write: *allow_write,
            };
            for entry in inner.peers.iter() {
                if let Err(err) = entry.value().send_control(&msg).await {
                    warn!(peer = entry.key(), %err, "file list broadcast failed");
                }
            }
        }
    }
}

/// Host: reclaim upload records that went quiet.
async fn run_upload_sweep(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(UPLOAD_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        inner.uploads.evict_stale();
    }
}

async fn run_peer(
    inner: Arc<Inner>,
    transport: Arc<PeerTransport>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::StateChanged(state) => {
                debug!(peer = transport.peer_id(), ?state, "peer transport state");
            }
            PeerEvent::Control(msg) => handle_control(&inner, &transport, msg).await,
            PeerEvent::FileChunk {
                path,
                index,
                total,
                data,
            } => inner.handle_file_chunk(&path, index, total, data),
            PeerEvent::UploadChunk {
                path,
                index,
                total,
                data,
            } => {
                inner
                    .handle_upload_chunk(&transport, &path, index, total, data)
                    .await;
            }
            PeerEvent::Closed => break,
        }
    }
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Guests initiate the direct channel, hosts answer.
    fn initiates(&self) -> bool {
        matches!(self.role, Role::Guest { .. })
    }

    async fn remove_peer(&self, peer_id: &str) {
        if let Some((_, transport)) = self.peers.remove(peer_id) {
            transport.close().await;
        }
        self.uploads.drop_peer(peer_id);
        self.download_limiter.forget(peer_id);
        self.upload_limiter.forget(peer_id);
    }

    fn handle_file_chunk(&self, path: &str, index: u32, total: u32, data: Vec<u8>) {
        match self.downloads.accept_chunk(path, index, total, data) {
            Ok(Some((received, total))) => {
                self.emit(ClientEvent::DownloadProgress {
                    path: path.to_owned(),
                    received,
                    total,
                });
            }
            Ok(None) => {}
            Err(err) => warn!(path, %err, "file chunk rejected"),
        }
    }

    async fn handle_upload_start(
        &self,
        transport: &Arc<PeerTransport>,
        path: String,
        size: u64,
        total_chunks: u32,
    ) {
        let allow_write = matches!(
            self.role,
            Role::Host {
                allow_write: true,
                ..
            }
        );
        if let Err(err) = self.uploads.begin(
            transport.peer_id(),
            &path,
            size,
            total_chunks,
            allow_write,
            &self.upload_limiter,
        ) {
            warn!(peer = transport.peer_id(), path, %err, "upload refused");
            self.respond_upload(transport, path, false, err.to_string())
                .await;
        }
    }

    async fn handle_upload_chunk(
        &self,
        transport: &Arc<PeerTransport>,
        path: &str,
        index: u32,
        total: u32,
        data: Vec<u8>,
    ) {
        match self
            .uploads
            .accept_chunk(transport.peer_id(), path, index, total, data)
        {
            Ok(()) => {}
            Err(err @ ClientError::TooLarge { .. }) => {
                // the record was aborted; tell the sender now
                self.respond_upload(transport, path.to_owned(), false, err.to_string())
                    .await;
            }
            Err(err) => warn!(path, %err, "upload chunk rejected"),
        }
    }

    async fn handle_upload_complete(
        &self,
        transport: &Arc<PeerTransport>,
        path: String,
        nonce: &str,
        hmac: &str,
    ) {
        let Role::Host { root, .. } = &self.role else {
            return;
        };
        let outcome = match self
            .uploads
            .complete(&self.key, transport.peer_id(), &path, nonce, hmac)
        {
            Ok(bytes) => fsio::write_atomic(root, &path, bytes)
                .await
                .map_err(ClientError::from),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(location) => {
                info!(
                    peer = transport.peer_id(),
                    path,
                    location = %location.display(),
                    "upload stored"
                );
                self.emit(ClientEvent::UploadStored {
                    peer: transport.peer_id().to_owned(),
                    path: path.clone(),
                });
                self.respond_upload(transport, path, true, "stored".into())
                    .await;
            }
            Err(err) => {
                warn!(path, %err, "upload failed, nothing persisted");
                self.respond_upload(transport, path, false, err.to_string())
                    .await;
            }
        }
    }

    async fn respond_upload(
        &self,
        transport: &Arc<PeerTransport>,
        path: String,
        success: bool,
        message: String,
    ) {
        let response = ControlMessage::UploadResponse {
            path,
            success,
            message,
        };
        if let Err(err) = transport.send_control(&response).await {
            warn!(peer = transport.peer_id(), %err, "upload response not delivered");
        }
    }
}

/// Look up or create the transport for `peer_id` and spawn its event loop.
///
/// Hosts greet every new peer with the current share listing.
fn add_peer(inner: &Arc<Inner>, peer_id: &str) -> Arc<PeerTransport> {
    if let Some(existing) = inner.peers.get(peer_id) {
        return Arc::clone(existing.value());
    }
    let direct = inner
        .factory
        .as_ref()
        .and_then(|f| f.create(peer_id, inner.initiates()));
    let sink: Arc<dyn SignalingSink> = Arc::new(inner.signaling.clone());
    let (transport, peer_events) = PeerTransport::new(
        peer_id,
        inner.key.clone(),
        direct,
        sink,
        PeerTransportConfig::default(),
    );
    let transport = Arc::new(transport);
    inner.peers.insert(peer_id.to_owned(), Arc::clone(&transport));
    tokio::spawn(run_peer(
        Arc::clone(inner),
        Arc::clone(&transport),
        peer_events,
    ));

    if let Role::Host { root, allow_write } = &inner.role {
        let root = root.clone();
        let allow_write = *allow_write;
        let greeting = Arc::clone(&transport);
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let entries = fsio::list_entries(&root).await;
            if let Ok(mut files) = inner.files.lock() {
                *files = entries.iter().map(|e| (e.path.clone(), e.clone())).collect();
            }
            let msg = ControlMessage::FileList {
                files: entries,
                allow_write,
            };
            if let Err(err) = greeting.send_control(&msg).await {
                warn!(peer = greeting.peer_id(), %err, "file list send failed");
            }
        });
    }
    transport
}

async fn handle_control(inner: &Arc<Inner>, transport: &Arc<PeerTransport>, msg: ControlMessage) {
    match msg {
        ControlMessage::FileList { files, allow_write } => {
            handle_file_list(inner, transport, files, allow_write).await;
        }
        ControlMessage::FileRequest { path } => {
            handle_file_request(inner, transport, path);
        }
        ControlMessage::FileComplete {
            path, nonce, hmac, ..
        } => {
            handle_file_complete(inner, &path, &nonce, &hmac).await;
        }
        ControlMessage::UploadStart {
            path,
            size,
            total_chunks,
        } => {
            inner
                .handle_upload_start(transport, path, size, total_chunks)
                .await;
        }
        ControlMessage::UploadComplete { path, nonce, hmac } => {
            inner
                .handle_upload_complete(transport, path, &nonce, &hmac)
                .await;
        }
        ControlMessage::UploadResponse {
            path,
            success,
            message,
        } => {
            info!(path, success, message, "upload response");
        }
    }
}

async fn handle_file_list(
    inner: &Arc<Inner>,
    transport: &Arc<PeerTransport>,
    files: Vec<FileEntry>,
    allow_write: bool,
) {
    let Role::Guest { want, .. } = &inner.role else {
        debug!("ignoring file list while hosting");
        return;
    };
    if files.len() > MAX_SHARE_FILES {
        warn!(count = files.len(), "rejecting oversized file list");
        return;
    }
    if let Ok(mut known) = inner.files.lock() {
        *known = files.iter().map(|e| (e.path.clone(), e.clone())).collect();
    }
    if let Ok(mut host) = inner.host_peer.lock() {
        host.get_or_insert_with(|| transport.peer_id().to_owned());
    }
    inner.emit(ClientEvent::FileList {
        files: files.clone(),
        allow_write,
    });

    // act on the first listing only; later updates are informational
    if inner.downloads_started.swap(true, Ordering::SeqCst) {
        return;
    }
    let wanted: Vec<String> = match want {
        Some(path) => {
            if files.iter().any(|e| e.path == *path) {
                vec![path.clone()]
            } else {
                inner.emit(ClientEvent::TransferFailed {
                    path: path.clone(),
                    reason: "not present in the share".into(),
                });
                Vec::new()
            }
        }
        None => files.iter().map(|e| e.path.clone()).collect(),
    };

    let first_batch = {
        let Ok(mut fanout) = inner.fanout.lock() else {
            return;
        };
        fanout.enqueue(wanted);
        fanout.start_available()
    };
    if first_batch.is_empty() {
        inner.emit(ClientEvent::AllDownloadsDone);
        return;
    }
    for path in first_batch {
        start_download(inner, transport, &path).await;
    }
}

async fn start_download(inner: &Arc<Inner>, transport: &Arc<PeerTransport>, path: &str) {
    let size = inner
        .files
        .lock()
        .ok()
        .and_then(|files| files.get(path).map(|e| e.size))
        .unwrap_or(0);
    let request = async {
        inner.downloads.begin(path, size)?;
        transport
            .send_control(&ControlMessage::FileRequest {
                path: path.to_owned(),
            })
            .await?;
        Ok::<(), ClientError>(())
    };
    if let Err(err) = request.await {
        warn!(path, %err, "download could not start");
        inner.downloads.abort(path);
        inner.emit(ClientEvent::TransferFailed {
            path: path.to_owned(),
            reason: err.to_string(),
        });
        advance_fanout(inner).await;
    }
}

/// Release a fan-out slot and start the next queued file, if any.
async fn advance_fanout(inner: &Arc<Inner>) {
    let (next, idle) = {
        let Ok(mut fanout) = inner.fanout.lock() else {
            return;
        };
        let next = fanout.finish_one();
        (next, fanout.idle())
    };
    if let Some(path) = next {
        let host = inner
            .host_peer
            .lock()
            .ok()
            .and_then(|host| host.clone())
            .and_then(|id| inner.peers.get(&id).map(|e| Arc::clone(e.value())));
        match host {
            Some(transport) => Box::pin(start_download(inner, &transport, &path)).await,
            None => {
                inner.emit(ClientEvent::TransferFailed {
                    path,
                    reason: "host disconnected".into(),
                });
            }
        }
    } else if idle {
        inner.emit(ClientEvent::AllDownloadsDone);
    }
}

async fn handle_file_complete(inner: &Arc<Inner>, path: &str, nonce: &str, hmac: &str) {
    let Role::Guest { output, .. } = &inner.role else {
        return;
    };
    let outcome = match inner.downloads.complete(&inner.key, path, nonce, hmac) {
        Ok(bytes) => fsio::write_atomic(output, path, bytes)
            .await
            .map_err(ClientError::from),
        Err(err) => Err(err),
    };
    match outcome {
        Ok(location) => {
            info!(path, location = %location.display(), "file saved");
            inner.emit(ClientEvent::FileSaved {
                path: path.to_owned(),
                location,
            });
        }
        Err(err) => {
            warn!(path, %err, "download failed, nothing persisted");
            inner.emit(ClientEvent::TransferFailed {
                path: path.to_owned(),
                reason: err.to_string(),
            });
        }
    }
    advance_fanout(inner).await;
}

fn handle_file_request(inner: &Arc<Inner>, transport: &Arc<PeerTransport>, path: String) {
    let Role::Host { root, .. } = &inner.role else {
        debug!("ignoring file request while not hosting");
        return;
    };
    if let Err(err) = validate_request_path(&path) {
        warn!(peer = transport.peer_id(), %err, "file request dropped");
        return;
    }
    if !inner.download_limiter.allow(transport.peer_id()) {
        warn!(peer = transport.peer_id(), path, "download rate limit hit");
        return;
    }
    let root = root.clone();
    let inner = Arc::clone(inner);
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        let size = match fsio::file_size(&root, &path).await {
            Ok(size) => size,
            Err(err) => {
                warn!(path, %err, "requested file unavailable");
                return;
            }
        };
        if size > MAX_FILE_SIZE {
            warn!(path, size, "requested file exceeds the transfer ceiling");
            return;
        }
        if let Err(err) = serve_file(&inner, &transport, &root, &path, size).await {
            warn!(path, %err, "serving file failed");
        }
    });
}

/// Stream one file as chunks, then announce completion with the tag.
async fn serve_file(
    inner: &Arc<Inner>,
    transport: &Arc<PeerTransport>,
    root: &std::path::Path,
    path: &str,
    size: u64,
) -> Result<(), ClientError> {
    let total = chunk_count(size);
    let nonce = TransferNonce::generate(&mut OsRng);
    let mac_key = derive_transfer_key(&inner.key, &nonce);
    let mut tag = TagBuilder::new(&mac_key);

    for index in 0..total {
        let data = fsio::read_chunk(root, path, index).await?;
        tag.update(&data);
        transport.send_file_chunk(path, index, total, data).await?;
        // keep other peers' traffic moving between chunks
        tokio::task::yield_now().await;
    }

    let name = path.rsplit('/').next().unwrap_or(path).to_owned();
    transport
        .send_control(&ControlMessage::FileComplete {
            path: path.to_owned(),
            name,
            size,
            nonce: nonce.to_base64(),
            hmac: tag.finalize().to_base64(),
        })
        .await?;
    debug!(peer = transport.peer_id(), path, chunks = total, "file served");
    Ok(())
}
