//! Message protocol engine.
//!
//! [`dispatch`] applies one decoded envelope from one peer to local state.
//! The match over [`MeshMessage`] is exhaustive, so a new message kind does
//! not compile until it is handled here. Anything a well-behaved peer would
//! never send comes back as a [`ProtocolViolation`]; the reader drops the
//! message and counts it.

use crate::events::{ChatLine, MeshEvent};
use crate::mesh::MeshShared;
use crate::observability as obs;
use crate::transfers::ReceiveError;
use chrono::{TimeZone, Utc};
use common::types::{AdminAction, PeerId, SessionId};
use mesh_protocol::transfer::FileDescriptor;
use mesh_protocol::{Envelope, MediaKind, MeshMessage, TransferError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the reader should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The peer said goodbye; stop reading and remove it.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Frame did not decode into a known message.
    Malformed(String),
    /// Envelope `sender` is not the peer on the other end of the channel.
    SenderMismatch { claimed: PeerId },
    /// `admin_action` from someone other than the room creator.
    UnauthorizedAdmin,
    /// `file_chunk` for a file that was never announced.
    UnknownFile(String),
    /// Bad chunk index, oversized announcement or chunk data past the
    /// announced size.
    InvalidTransfer(TransferError),
    /// Announcement while the sender already has too many files in flight.
    TooManyDownloads,
}

impl ProtocolViolation {
    /// Metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::SenderMismatch { .. } => "sender_mismatch",
            Self::UnauthorizedAdmin => "unauthorized_admin",
            Self::UnknownFile(_) => "unknown_file",
            Self::InvalidTransfer(_) => "invalid_transfer",
            Self::TooManyDownloads => "too_many_downloads",
        }
    }
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed message: {reason}"),
            Self::SenderMismatch { claimed } => write!(f, "sender field claims {claimed}"),
            Self::UnauthorizedAdmin => f.write_str("admin action from non-creator"),
            Self::UnknownFile(file_id) => write!(f, "chunk for unannounced file {file_id}"),
            Self::InvalidTransfer(e) => write!(f, "invalid transfer: {e}"),
            Self::TooManyDownloads => f.write_str("too many downloads from one sender"),
        }
    }
}

impl From<ReceiveError> for ProtocolViolation {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::UnknownFile(file_id) => Self::UnknownFile(file_id.to_string()),
            ReceiveError::Transfer(e) => Self::InvalidTransfer(e),
            ReceiveError::TooManyDownloads { .. } => Self::TooManyDownloads,
        }
    }
}

/// Apply one message received from `from`.
pub(crate) async fn dispatch(
    shared: &Arc<MeshShared>,
    from: &PeerId,
    envelope: Envelope,
) -> Result<Flow, ProtocolViolation> {
    if envelope.sender != *from {
        return Err(ProtocolViolation::SenderMismatch {
            claimed: envelope.sender,
        });
    }

    match envelope.message {
        MeshMessage::Chat { content } => {
            let timestamp = Utc
                .timestamp_millis_opt(envelope.timestamp)
                .single()
                .unwrap_or_else(Utc::now);
            let line = ChatLine {
                sender: from.clone(),
                content,
                timestamp,
            };
            shared.chat.lock().await.push(line.clone());
            shared.emit(MeshEvent::ChatReceived(line));
        }

        MeshMessage::MediaStateChange { kind, enabled } => {
            apply_media_state(shared, from, kind, enabled).await;
        }

        MeshMessage::AdminAction {
            action,
            target_peer_id,
            target_session_id,
        } => {
            if *from != shared.creator_peer_id {
                return Err(ProtocolViolation::UnauthorizedAdmin);
            }
            apply_admin_action(shared, action, target_peer_id, target_session_id).await;
        }

        MeshMessage::FileMetadata {
            file_id,
            file_name,
            mime_type,
            file_size,
            total_chunks,
        } => {
            let descriptor = FileDescriptor {
                file_id,
                file_name,
                mime_type,
                file_size,
                total_chunks,
            };
            let receipt = shared
                .transfers
                .lock()
                .await
                .offer(from, descriptor.clone())
                .map_err(|e| {
                    obs::record_file_transfer("download", "rejected");
                    ProtocolViolation::from(e)
                })?;

            debug!(
                target: "mesh.transfer",
                from = %from,
                file_id = %descriptor.file_id,
                total_chunks = descriptor.total_chunks,
                "File announced"
            );
            let file_id = descriptor.file_id.clone();
            shared.emit(MeshEvent::FileOffered {
                from: from.clone(),
                descriptor,
            });
            if let Some(receipt) = receipt {
                shared.deliver_receipt(from, &file_id, receipt);
            }
        }

        MeshMessage::FileChunk {
            file_id,
            chunk_index,
            data,
        } => {
            let receipt = shared
                .transfers
                .lock()
                .await
                .receive_chunk(from, &file_id, chunk_index, data)?;
            shared.deliver_receipt(from, &file_id, receipt);
        }

        MeshMessage::PeerLeaving => {
            debug!(target: "mesh.engine", peer_id = %from, "Peer announced departure");
            return Ok(Flow::Close);
        }

        MeshMessage::RecordingStarted => set_recording(shared, from, true).await,
        MeshMessage::RecordingStopped => set_recording(shared, from, false).await,
    }

    Ok(Flow::Continue)
}

async fn apply_media_state(shared: &MeshShared, from: &PeerId, kind: MediaKind, enabled: bool) {
    {
        let mut peers = shared.peers.lock().await;
        let Some(entry) = peers.get_mut(from) else {
            return;
        };
        match kind {
            MediaKind::Audio => entry.remote_audio_enabled = enabled,
            MediaKind::Video => entry.remote_video_enabled = enabled,
        }
    }
    shared.emit(MeshEvent::MediaStateChanged {
        peer_id: from.clone(),
        kind,
        enabled,
    });
}

async fn set_recording(shared: &MeshShared, from: &PeerId, recording: bool) {
    if let Some(entry) = shared.peers.lock().await.get_mut(from) {
        entry.remote_recording = recording;
    }
    shared.emit(MeshEvent::RecordingChanged {
        peer_id: from.clone(),
        recording,
    });
}

/// Mirror a moderation action the creator already applied at the registry.
async fn apply_admin_action(
    shared: &Arc<MeshShared>,
    action: AdminAction,
    target_peer_id: PeerId,
    target_session_id: Option<SessionId>,
) {
    if target_peer_id != shared.local_peer_id {
        if action.targets_peer() {
            shared.emit(MeshEvent::PeerModerated {
                peer_id: target_peer_id,
                action,
            });
        }
        return;
    }

    match action {
        AdminAction::Mute => {
            info!(target: "mesh.engine", "Muted by room admin");
            shared.media.force_mute();
            shared.emit(MeshEvent::ForcedMute);
        }
        AdminAction::Unmute => {
            info!(target: "mesh.engine", "Unmuted by room admin");
            shared.media.release_mute();
            shared.emit(MeshEvent::ForcedUnmute);
        }
        AdminAction::Kick => {
            // The ban is kept under our own session, the one a rejoin would use.
            if target_session_id.is_some_and(|s| s != shared.session_id) {
                warn!(target: "mesh.engine", "Kick names a different session than ours");
            }
            if let Err(e) = shared.bans.ban(&shared.room_id, &shared.session_id).await {
                warn!(target: "mesh.engine", error = %e, "Kick ban not persisted");
            }

            info!(target: "mesh.engine", room_id = %shared.room_id, "Kicked from room");
            shared.mark_kicked();
            shared.emit(MeshEvent::Kicked {
                room_id: shared.room_id.clone(),
            });

            // Shutdown cancels this reader, so it runs on its own task.
            let mesh = Arc::clone(shared);
            tokio::spawn(async move { mesh.shutdown().await });
        }
        AdminAction::Lock | AdminAction::Unlock => {
            debug!(
                target: "mesh.engine",
                action = action.as_str(),
                "Room-wide action needs no local effect"
            );
        }
    }
}
