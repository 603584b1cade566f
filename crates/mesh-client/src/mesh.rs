//! Mesh topology manager.
//!
//! Owns one entry per connected remote peer and decides whom to connect to
//! and when to tear a connection down. Each entry runs two tasks:
//!
//! - a writer draining the peer's outbound frame queue into the channel
//! - a reader decoding inbound frames and handing them to [`crate::engine`]
//!   strictly one at a time
//!
//! Readers of different peers run in parallel. Any read or write failure,
//! `peer_leaving`, or too many protocol violations ends in the same
//! [`MeshShared::remove_peer`] path, which releases the entry, its media
//! stream and any half-received downloads from that peer.
//!
//! Sends never wait on one peer before queueing for the next. A frame goes
//! into every target's queue at once; only peers whose queue is full are
//! waited on, in parallel and for at most the connect timeout, after which
//! they are torn down.
//!
//! If the transport stops accepting, the local peer is gone from the network
//! and the whole mesh shuts down.
//!
//! # Task hierarchy
//!
//! ```text
//! MeshManager (cancel_token)
//! ├── acceptor task
//! └── per peer (child token)
//!     ├── writer task
//!     └── reader task
//! ```

use crate::config::ClientConfig;
use crate::engine::{self, Flow};
use crate::errors::ClientError;
use crate::events::{ChatLine, DisconnectReason, MeshEvent};
use crate::moderation::{BanList, LocalMedia};
use crate::observability as obs;
use crate::transfers::{ChunkReceipt, TransferBook, TransferKey, TransferStatus};
use crate::transport::{
    ChannelSink, ChannelSource, HandshakeMetadata, MediaStream, PeerLink, Transport,
};
use bytes::Bytes;
use chrono::Utc;
use common::types::{PeerId, RoomId, SessionId};
use mesh_protocol::codec::{decode_envelope, encode_envelope, read_frame, write_frame};
use mesh_protocol::transfer::{
    split_into_chunks, ChunkOutcome, Direction, FileDescriptor, TransferProgress,
};
use mesh_protocol::{CodecError, Envelope, FileId, MediaKind, MeshMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Frames queued per peer before senders wait.
const PEER_OUTBOUND_CAPACITY: usize = 256;

/// Events buffered for the application before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Time a closing writer gets to flush already-queued frames.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity and settings of the mesh for one joined room.
#[derive(Debug, Clone)]
pub struct MeshParams {
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub creator_peer_id: PeerId,
    pub config: ClientConfig,
}

/// Public view of one connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub session_id: Option<SessionId>,
    pub remote_audio_enabled: bool,
    pub remote_video_enabled: bool,
    pub remote_recording: bool,
}

/// Outcome of a broadcast. Failed peers are already being torn down.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<PeerId>,
}

/// Outcome of connecting to a roster.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub connected: Vec<PeerId>,
    /// Already connected, in progress, or ourselves.
    pub skipped: Vec<PeerId>,
    pub unreachable: Vec<PeerId>,
}

pub(crate) struct PeerEntry {
    connection_id: u64,
    session_id: Option<SessionId>,
    outbound: mpsc::Sender<Bytes>,
    media: Box<dyn MediaStream>,
    cancel_token: CancellationToken,
    pub(crate) remote_audio_enabled: bool,
    pub(crate) remote_video_enabled: bool,
    pub(crate) remote_recording: bool,
}

impl PeerEntry {
    fn target(&self, peer_id: &PeerId) -> SendTarget {
        SendTarget {
            peer_id: peer_id.clone(),
            connection_id: self.connection_id,
            outbound: self.outbound.clone(),
        }
    }

    fn info(&self, peer_id: &PeerId) -> PeerInfo {
        PeerInfo {
            peer_id: peer_id.clone(),
            session_id: self.session_id.clone(),
            remote_audio_enabled: self.remote_audio_enabled,
            remote_video_enabled: self.remote_video_enabled,
            remote_recording: self.remote_recording,
        }
    }
}

/// State shared by the manager handle and every peer task.
pub(crate) struct MeshShared {
    pub(crate) room_id: RoomId,
    pub(crate) local_peer_id: PeerId,
    pub(crate) session_id: SessionId,
    pub(crate) creator_peer_id: PeerId,
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    pub(crate) peers: Mutex<HashMap<PeerId, PeerEntry>>,
    pending: Mutex<HashSet<PeerId>>,
    pub(crate) transfers: Mutex<TransferBook>,
    pub(crate) chat: Mutex<Vec<ChatLine>>,
    pub(crate) media: Arc<LocalMedia>,
    pub(crate) bans: Arc<BanList>,
    events: mpsc::Sender<MeshEvent>,
    cancel_token: CancellationToken,
    next_connection_id: AtomicU64,
    kicked: AtomicBool,
    transport_lost: AtomicBool,
}

/// One open connection to send on, pinned to its connection id.
#[derive(Clone)]
struct SendTarget {
    peer_id: PeerId,
    connection_id: u64,
    outbound: mpsc::Sender<Bytes>,
}

/// Handle to the mesh of one joined room. Cheap to clone.
#[derive(Clone)]
pub struct MeshManager {
    shared: Arc<MeshShared>,
}

impl std::fmt::Debug for MeshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshManager")
            .field("room_id", &self.shared.room_id)
            .field("local_peer_id", &self.shared.local_peer_id)
            .field("closed", &self.shared.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl MeshManager {
    /// Start accepting inbound links. Returns the handle and the event stream.
    pub fn start(
        params: MeshParams,
        transport: Arc<dyn Transport>,
        media: Arc<LocalMedia>,
        bans: Arc<BanList>,
    ) -> (Self, mpsc::Receiver<MeshEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(MeshShared {
            room_id: params.room_id,
            local_peer_id: transport.local_peer_id(),
            session_id: params.session_id,
            creator_peer_id: params.creator_peer_id,
            config: params.config,
            transport,
            peers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            transfers: Mutex::new(TransferBook::new()),
            chat: Mutex::new(Vec::new()),
            media,
            bans,
            events,
            cancel_token: CancellationToken::new(),
            next_connection_id: AtomicU64::new(1),
            kicked: AtomicBool::new(false),
            transport_lost: AtomicBool::new(false),
        });

        tokio::spawn(run_acceptor(Arc::clone(&shared)));

        info!(
            target: "mesh.manager",
            room_id = %shared.room_id,
            peer_id = %shared.local_peer_id,
            "Mesh started"
        );

        (Self { shared }, receiver)
    }

    #[must_use]
    pub fn local_peer_id(&self) -> &PeerId {
        &self.shared.local_peer_id
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.shared.room_id
    }

    /// True once the mesh was shut down, by leave, kick or transport loss.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel_token.is_cancelled()
    }

    /// Resolves once the mesh is shut down.
    pub async fn closed(&self) {
        self.shared.cancel_token.cancelled().await;
    }

    #[must_use]
    pub fn was_kicked(&self) -> bool {
        self.shared.kicked.load(Ordering::SeqCst)
    }

    /// Whether the mesh closed because the transport stopped accepting.
    #[must_use]
    pub fn transport_lost(&self) -> bool {
        self.shared.transport_lost.load(Ordering::SeqCst)
    }

    pub fn local_media(&self) -> &Arc<LocalMedia> {
        &self.shared.media
    }

    /// Open one connection to every roster member, in parallel, each bounded
    /// by the connect timeout. Unreachable peers are logged and reported.
    #[instrument(skip_all, name = "mesh.connect_roster", fields(count = roster.len()))]
    pub async fn connect_roster(&self, roster: &[PeerId]) -> ConnectReport {
        let mut attempts = JoinSet::new();
        for peer in roster {
            let mesh = self.clone();
            let peer = peer.clone();
            attempts.spawn(async move {
                let result = mesh.connect_to(&peer).await;
                (peer, result)
            });
        }

        let mut report = ConnectReport::default();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((peer, Ok(true))) => report.connected.push(peer),
                Ok((peer, Ok(false))) => report.skipped.push(peer),
                Ok((peer, Err(e))) => {
                    warn!(
                        target: "mesh.manager",
                        peer_id = %peer,
                        error = %e,
                        "Peer unreachable"
                    );
                    report.unreachable.push(peer);
                }
                Err(e) => {
                    warn!(target: "mesh.manager", error = %e, "Connect task failed");
                }
            }
        }
        report.connected.sort();
        report.skipped.sort();
        report.unreachable.sort();
        report
    }

    /// Connect to one peer. `Ok(false)` when there is nothing to do: the peer
    /// is ourselves, already connected, or a connection is in flight.
    pub async fn connect_to(&self, peer: &PeerId) -> Result<bool, ClientError> {
        let shared = &self.shared;
        if shared.cancel_token.is_cancelled() {
            return Err(ClientError::InvalidState("Mesh is closed".to_string()));
        }
        if *peer == shared.local_peer_id || shared.peers.lock().await.contains_key(peer) {
            obs::record_connect_attempt("duplicate");
            return Ok(false);
        }
        if !shared.pending.lock().await.insert(peer.clone()) {
            obs::record_connect_attempt("duplicate");
            return Ok(false);
        }

        let metadata = HandshakeMetadata {
            session_id: shared.session_id.clone(),
        };
        let attempt = tokio::time::timeout(
            shared.config.connect_timeout,
            shared.transport.connect(peer, metadata),
        )
        .await;
        shared.pending.lock().await.remove(peer);

        let link = match attempt {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                obs::record_connect_attempt("failed");
                return Err(e.into());
            }
            Err(_) => {
                obs::record_connect_attempt("timeout");
                return Err(crate::transport::TransportError::Timeout.into());
            }
        };

        let registered = shared.register_link(link).await;
        obs::record_connect_attempt(if registered { "connected" } else { "duplicate" });
        Ok(registered)
    }

    /// Connected peers, ordered by id.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let peers = self.shared.peers.lock().await;
        let mut infos: Vec<PeerInfo> = peers.iter().map(|(id, entry)| entry.info(id)).collect();
        infos.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        infos
    }

    pub async fn peer(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.shared
            .peers
            .lock()
            .await
            .get(peer_id)
            .map(|entry| entry.info(peer_id))
    }

    pub async fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.shared.peers.lock().await.contains_key(peer_id)
    }

    /// Send `message` to every open connection.
    ///
    /// Per-peer failures never abort the broadcast; the failing peer is torn
    /// down and listed in the report. Only an unencodable message is an error.
    pub async fn broadcast(&self, message: MeshMessage) -> Result<BroadcastReport, ClientError> {
        self.shared.broadcast(message).await
    }

    /// Send `message` to one peer.
    pub async fn send_to(&self, peer_id: &PeerId, message: MeshMessage) -> Result<(), ClientError> {
        let target = self
            .shared
            .peers
            .lock()
            .await
            .get(peer_id)
            .map(|entry| entry.target(peer_id));
        let Some(target) = target else {
            return Err(ClientError::NotFound(format!("Peer {peer_id} is not connected")));
        };

        let report = self.shared.send_to_targets(&[target], message).await?;
        if report.failed.is_empty() {
            Ok(())
        } else {
            Err(crate::transport::TransportError::Closed.into())
        }
    }

    /// Announce and stream a file to every connected peer.
    ///
    /// Chunks follow the metadata on each channel in index order. Only the
    /// connections that received the metadata get chunks; peers joining
    /// mid-transfer are left out. Upload progress is reported as events and
    /// kept until the grace period ends.
    #[instrument(skip_all, name = "mesh.share_file", fields(file_name = %file_name, size = data.len()))]
    pub async fn share_file(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<FileDescriptor, ClientError> {
        let shared = &self.shared;
        let chunks = split_into_chunks(&data, shared.config.file_chunk_size)?;
        let total_chunks = u32::try_from(chunks.len())
            .map_err(|e| ClientError::Internal(format!("chunk count overflow: {e}")))?;

        let descriptor = {
            let mut book = shared.transfers.lock().await;
            let file_id = book.next_upload_id(Utc::now().timestamp_millis(), file_name);
            let descriptor = FileDescriptor {
                file_id,
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
                file_size: data.len() as u64,
                total_chunks,
            };
            book.begin_upload(descriptor.clone());
            descriptor
        };

        if let Err(e) = self.stream_chunks(&descriptor, chunks).await {
            shared
                .transfers
                .lock()
                .await
                .cancel(&TransferKey::Upload(descriptor.file_id.clone()));
            obs::record_file_transfer(Direction::Upload.as_str(), "abandoned");
            return Err(e);
        }

        obs::record_file_transfer(Direction::Upload.as_str(), "completed");
        shared.schedule_clear(TransferKey::Upload(descriptor.file_id.clone()));
        info!(
            target: "mesh.transfer",
            file_id = %descriptor.file_id,
            chunks = descriptor.total_chunks,
            "File shared"
        );
        Ok(descriptor)
    }

    async fn stream_chunks(
        &self,
        descriptor: &FileDescriptor,
        chunks: Vec<Bytes>,
    ) -> Result<(), ClientError> {
        let shared = &self.shared;
        let mut targets = shared.snapshot_targets().await;
        let report = shared
            .send_to_targets(&targets, MeshMessage::file_metadata(descriptor))
            .await?;
        targets.retain(|t| report.delivered.contains(&t.peer_id));

        let mut last_percent = None;
        for (index, chunk) in (0u32..).zip(chunks) {
            let report = shared
                .send_to_targets(
                    &targets,
                    MeshMessage::FileChunk {
                        file_id: descriptor.file_id.clone(),
                        chunk_index: index,
                        data: chunk,
                    },
                )
                .await?;
            if !report.failed.is_empty() {
                targets.retain(|t| !report.failed.contains(&t.peer_id));
            }

            let recorded = shared
                .transfers
                .lock()
                .await
                .record_upload_chunk(&descriptor.file_id);
            let Some((outcome, progress)) = recorded else {
                continue;
            };
            if last_percent != Some(progress.percent()) {
                last_percent = Some(progress.percent());
                shared.emit(MeshEvent::FileProgress {
                    peer_id: shared.local_peer_id.clone(),
                    file_id: descriptor.file_id.clone(),
                    direction: Direction::Upload,
                    progress,
                });
            }
            if outcome == ChunkOutcome::Complete {
                break;
            }
        }
        Ok(())
    }

    /// Active and recently finished transfers.
    pub async fn transfers(&self) -> Vec<TransferStatus> {
        self.shared.transfers.lock().await.statuses()
    }

    /// Chat lines seen since joining, oldest first, including our own.
    pub async fn chat_history(&self) -> Vec<ChatLine> {
        self.shared.chat.lock().await.clone()
    }

    pub(crate) async fn record_chat(&self, line: ChatLine) {
        self.shared.chat.lock().await.push(line);
    }

    /// Seed the local history, e.g. from the join snapshot.
    pub(crate) async fn seed_chat(&self, lines: Vec<ChatLine>) {
        let mut chat = self.shared.chat.lock().await;
        let mut seeded = lines;
        seeded.append(&mut chat);
        *chat = seeded;
    }

    /// Close the connection to one peer.
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.shared
            .remove_peer(peer_id, None, DisconnectReason::LocalClose)
            .await
    }

    /// Say goodbye to every peer and release all connections.
    ///
    /// Idempotent. Local state is released even when the goodbye cannot be
    /// delivered.
    pub async fn shutdown(&self) {
        self.shared.shutdown().await;
    }
}

impl MeshShared {
    pub(crate) fn emit(&self, event: MeshEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(target: "mesh.manager", event = ?event, "Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub(crate) fn mark_kicked(&self) {
        self.kicked.store(true, Ordering::SeqCst);
    }

    fn encode(&self, message: MeshMessage) -> Result<Bytes, ClientError> {
        let envelope = Envelope::new(self.local_peer_id.clone(), message);
        Ok(encode_envelope(&envelope)?)
    }

    async fn broadcast(&self, message: MeshMessage) -> Result<BroadcastReport, ClientError> {
        let targets = self.snapshot_targets().await;
        self.send_to_targets(&targets, message).await
    }

    /// Every open connection, as of now.
    async fn snapshot_targets(&self) -> Vec<SendTarget> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(id, entry)| entry.target(id))
            .collect()
    }

    /// Queue one message for each target.
    ///
    /// Targets with room in their queue take the frame immediately. Full
    /// queues are waited on concurrently, each for at most the connect
    /// timeout. Targets that time out or have closed are removed.
    async fn send_to_targets(
        &self,
        targets: &[SendTarget],
        message: MeshMessage,
    ) -> Result<BroadcastReport, ClientError> {
        let kind = message.kind();
        let frame = self.encode(message)?;

        let mut report = BroadcastReport::default();
        let mut failed: Vec<(SendTarget, String)> = Vec::new();
        let mut waiting = JoinSet::new();
        for target in targets {
            match target.outbound.try_send(frame.clone()) {
                Ok(()) => report.delivered.push(target.peer_id.clone()),
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    let target = target.clone();
                    let timeout = self.config.connect_timeout;
                    waiting.spawn(async move {
                        let sent = target
                            .outbound
                            .send_timeout(frame, timeout)
                            .await
                            .map_err(|e| e.to_string());
                        (target, sent)
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failed.push((target.clone(), "channel closed".to_string()));
                }
            }
        }
        while let Some(joined) = waiting.join_next().await {
            match joined {
                Ok((target, Ok(()))) => report.delivered.push(target.peer_id),
                Ok((target, Err(e))) => failed.push((target, e)),
                Err(e) => warn!(target: "mesh.peer", error = %e, "Send task failed"),
            }
        }

        for (target, error) in failed {
            warn!(
                target: "mesh.peer",
                peer_id = %target.peer_id,
                error = %error,
                "Failed to queue frame for peer"
            );
            obs::record_broadcast_failure();
            self.remove_peer(
                &target.peer_id,
                Some(target.connection_id),
                DisconnectReason::TransportFailure(error),
            )
            .await;
            report.failed.push(target.peer_id);
        }
        for _ in &report.delivered {
            obs::record_message(kind, "out");
        }
        report.delivered.sort();
        report.failed.sort();
        Ok(report)
    }

    /// Record an open link and start its tasks. Returns false, dropping the
    /// link, when the peer already has a connection or the mesh is closed.
    pub(crate) async fn register_link(self: &Arc<Self>, link: PeerLink) -> bool {
        let PeerLink {
            remote_peer_id,
            remote_session_id,
            channel,
            media,
        } = link;

        if self.cancel_token.is_cancelled() || remote_peer_id == self.local_peer_id {
            media.close();
            return false;
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = self.cancel_token.child_token();
        let (outbound, outbound_rx) = mpsc::channel(PEER_OUTBOUND_CAPACITY);
        let announce = outbound.clone();

        let count = {
            let mut peers = self.peers.lock().await;
            if peers.contains_key(&remote_peer_id) {
                drop(peers);
                debug!(
                    target: "mesh.manager",
                    peer_id = %remote_peer_id,
                    "Duplicate connection dropped"
                );
                media.close();
                return false;
            }
            peers.insert(
                remote_peer_id.clone(),
                PeerEntry {
                    connection_id,
                    session_id: remote_session_id.clone(),
                    outbound,
                    media,
                    cancel_token: cancel_token.clone(),
                    remote_audio_enabled: false,
                    remote_video_enabled: false,
                    remote_recording: false,
                },
            );
            peers.len()
        };
        obs::set_peers_connected(count);
        self.queue_media_state(&remote_peer_id, &announce);

        tokio::spawn(run_writer(
            Arc::clone(self),
            remote_peer_id.clone(),
            connection_id,
            channel.sink,
            outbound_rx,
            cancel_token.clone(),
        ));
        tokio::spawn(run_reader(
            Arc::clone(self),
            remote_peer_id.clone(),
            connection_id,
            channel.source,
            cancel_token,
        ));

        info!(
            target: "mesh.manager",
            peer_id = %remote_peer_id,
            connected = count,
            "Peer connected"
        );
        self.emit(MeshEvent::PeerConnected {
            peer_id: remote_peer_id,
            session_id: remote_session_id,
        });
        true
    }

    /// Queue our media flags as the first frames of a new connection. The
    /// far side starts every new entry with both flags off.
    fn queue_media_state(&self, peer_id: &PeerId, outbound: &mpsc::Sender<Bytes>) {
        let state = self.media.state();
        for (kind, enabled) in [
            (MediaKind::Audio, state.audio_enabled),
            (MediaKind::Video, state.video_enabled),
        ] {
            let queued = self
                .encode(MeshMessage::MediaStateChange { kind, enabled })
                .map_err(|e| e.to_string())
                .and_then(|frame| outbound.try_send(frame).map_err(|e| e.to_string()));
            match queued {
                Ok(()) => obs::record_message("media_state_change", "out"),
                Err(e) => warn!(
                    target: "mesh.peer",
                    peer_id = %peer_id,
                    error = %e,
                    "Initial media state not queued"
                ),
            }
        }
    }

    /// Tear down a peer's entry. With `connection_id` set, only that exact
    /// connection is removed, so a stale task cannot remove a newer one.
    pub(crate) async fn remove_peer(
        &self,
        peer_id: &PeerId,
        connection_id: Option<u64>,
        reason: DisconnectReason,
    ) -> bool {
        let (entry, remaining) = {
            let mut peers = self.peers.lock().await;
            let matches = peers
                .get(peer_id)
                .is_some_and(|e| connection_id.map_or(true, |id| id == e.connection_id));
            if !matches {
                return false;
            }
            (peers.remove(peer_id), peers.len())
        };
        let Some(entry) = entry else {
            return false;
        };

        entry.cancel_token.cancel();
        entry.media.close();
        obs::set_peers_connected(remaining);

        let abandoned = self.transfers.lock().await.abandon_peer(peer_id);
        for _ in 0..abandoned {
            obs::record_file_transfer(Direction::Download.as_str(), "abandoned");
        }

        info!(
            target: "mesh.manager",
            peer_id = %peer_id,
            reason = reason.as_str(),
            remaining = remaining,
            "Peer disconnected"
        );
        self.emit(MeshEvent::PeerDisconnected {
            peer_id: peer_id.clone(),
            reason,
        });
        true
    }

    /// Surface progress or the finished file for a stored chunk.
    pub(crate) fn deliver_receipt(self: &Arc<Self>, from: &PeerId, file_id: &FileId, receipt: ChunkReceipt) {
        match receipt {
            ChunkReceipt::Stored(progress) => {
                // One event per whole-percent step keeps large files quiet.
                let before = TransferProgress {
                    done: progress.done.saturating_sub(1),
                    total: progress.total,
                };
                if progress.done == 1 || before.percent() != progress.percent() {
                    self.emit(MeshEvent::FileProgress {
                        peer_id: from.clone(),
                        file_id: file_id.clone(),
                        direction: Direction::Download,
                        progress,
                    });
                }
            }
            ChunkReceipt::Duplicate => {}
            ChunkReceipt::Complete { descriptor, data } => {
                obs::record_file_transfer(Direction::Download.as_str(), "completed");
                info!(
                    target: "mesh.transfer",
                    from = %from,
                    file_id = %descriptor.file_id,
                    size = data.len(),
                    "File received"
                );
                self.schedule_clear(TransferKey::Download(
                    from.clone(),
                    descriptor.file_id.clone(),
                ));
                self.emit(MeshEvent::FileReceived {
                    from: from.clone(),
                    descriptor,
                    data,
                });
            }
        }
    }

    /// Forget a finished transfer after the grace period.
    pub(crate) fn schedule_clear(self: &Arc<Self>, key: TransferKey) {
        let grace = self.config.transfer_grace;
        let cancel_token = self.cancel_token.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    if let Some(shared) = weak.upgrade() {
                        shared.transfers.lock().await.clear_finished(&key);
                    }
                }
            }
        });
    }

    pub(crate) async fn shutdown(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        // Goodbye is best-effort: a full queue skips it, the peer still
        // sees the channel close.
        match self.encode(MeshMessage::PeerLeaving) {
            Ok(frame) => {
                for target in self.snapshot_targets().await {
                    match target.outbound.try_send(frame.clone()) {
                        Ok(()) => obs::record_message("peer_leaving", "out"),
                        Err(e) => debug!(
                            target: "mesh.manager",
                            peer_id = %target.peer_id,
                            error = %e,
                            "Departure not queued"
                        ),
                    }
                }
            }
            Err(e) => warn!(target: "mesh.manager", error = %e, "Failed to announce departure"),
        }
        self.cancel_token.cancel();

        let entries: Vec<(PeerId, PeerEntry)> = self.peers.lock().await.drain().collect();
        for (peer_id, entry) in entries {
            entry.cancel_token.cancel();
            entry.media.close();
            self.emit(MeshEvent::PeerDisconnected {
                peer_id,
                reason: DisconnectReason::LocalClose,
            });
        }
        self.transfers.lock().await.clear();
        obs::set_peers_connected(0);

        info!(
            target: "mesh.manager",
            room_id = %self.room_id,
            kicked = self.kicked.load(Ordering::SeqCst),
            transport_lost = self.transport_lost.load(Ordering::SeqCst),
            "Mesh shut down"
        );
    }
}

async fn run_acceptor(shared: Arc<MeshShared>) {
    loop {
        let link = tokio::select! {
            () = shared.cancel_token.cancelled() => break,
            link = shared.transport.accept() => link,
        };
        let Some(link) = link else {
            if shared.cancel_token.is_cancelled() {
                break;
            }
            warn!(
                target: "mesh.manager",
                room_id = %shared.room_id,
                "Transport stopped accepting, closing mesh"
            );
            shared.transport_lost.store(true, Ordering::SeqCst);
            shared.emit(MeshEvent::TransportLost {
                room_id: shared.room_id.clone(),
            });
            shared.shutdown().await;
            break;
        };
        debug!(
            target: "mesh.manager",
            peer_id = %link.remote_peer_id,
            "Inbound link"
        );
        shared.register_link(link).await;
    }
}

async fn run_writer(
    shared: Arc<MeshShared>,
    peer_id: PeerId,
    connection_id: u64,
    mut sink: ChannelSink,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel_token: CancellationToken,
) {
    // Ok(false): cancelled mid-frame, the channel holds a partial frame.
    let result: Result<bool, CodecError> = async {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel_token.cancelled() => return Ok(true),
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => return Ok(true),
                },
            };
            tokio::select! {
                biased;
                written = write_frame(&mut sink, &frame) => written?,
                () = cancel_token.cancelled() => return Ok(false),
            }
        }
    }
    .await;

    let clean = match result {
        Ok(clean) => clean,
        Err(e) => {
            shared
                .remove_peer(
                    &peer_id,
                    Some(connection_id),
                    DisconnectReason::TransportFailure(e.to_string()),
                )
                .await;
            return;
        }
    };
    if !clean {
        debug!(target: "mesh.peer", peer_id = %peer_id, "Writer stopped mid-frame");
        return;
    }

    // Frames queued before the close (such as `peer_leaving`) still go out.
    let flush = async {
        while let Ok(frame) = outbound.try_recv() {
            write_frame(&mut sink, &frame).await?;
        }
        sink.shutdown().await?;
        Ok::<(), CodecError>(())
    };
    if let Ok(Err(e)) = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, flush).await {
        debug!(target: "mesh.peer", peer_id = %peer_id, error = %e, "Flush on close failed");
    }
}

async fn run_reader(
    shared: Arc<MeshShared>,
    peer_id: PeerId,
    connection_id: u64,
    mut source: ChannelSource,
    cancel_token: CancellationToken,
) {
    let max_violations = shared.config.max_protocol_violations;
    let mut violations: u32 = 0;

    let reason = loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => break DisconnectReason::LocalClose,
            frame = read_frame(&mut source) => frame,
        };

        let outcome = match frame {
            Ok(payload) => match decode_envelope(&payload) {
                Ok(envelope) => {
                    obs::record_message(envelope.message.kind(), "in");
                    engine::dispatch(&shared, &peer_id, envelope).await
                }
                Err(e) => Err(engine::ProtocolViolation::Malformed(e.to_string())),
            },
            Err(e) if e.is_recoverable() => {
                Err(engine::ProtocolViolation::Malformed(e.to_string()))
            }
            Err(CodecError::ConnectionClosed) => break DisconnectReason::ChannelClosed,
            Err(e) => break DisconnectReason::TransportFailure(e.to_string()),
        };

        match outcome {
            Ok(Flow::Continue) => violations = 0,
            Ok(Flow::Close) => break DisconnectReason::PeerLeft,
            Err(violation) => {
                violations += 1;
                obs::record_protocol_violation(violation.as_str());
                warn!(
                    target: "mesh.peer",
                    peer_id = %peer_id,
                    violation = %violation,
                    count = violations,
                    "Protocol violation, message dropped"
                );
                if violations >= max_violations {
                    break DisconnectReason::ProtocolViolations;
                }
            }
        }
    };

    if reason != DisconnectReason::LocalClose {
        shared
            .remove_peer(&peer_id, Some(connection_id), reason)
            .await;
    }
}
