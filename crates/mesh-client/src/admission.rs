//! Admission protocol, participant side.
//!
//! A [`Participant`] walks `Unjoined → Joining → Joined → Left`. Joining
//! verifies the room, joins it at the registry and then opens the mesh to
//! every roster member. A failed join leaves nothing behind: no registry
//! membership and no mesh. `Left` is terminal; rejoining takes a new
//! participant with a fresh peer identifier, normally under the same session.
//!
//! Moderation actions go to the registry first and are mirrored to connected
//! peers only after the registry accepted them.
//!
//! A joined participant whose transport stops accepting is gone from the
//! network. Its mesh closes and a background task removes it from the
//! registry, so no ghost member is left behind.

use crate::config::ClientConfig;
use crate::directory::{ActionCall, RoomDirectory};
use crate::errors::ClientError;
use crate::events::{ChatLine, MeshEvent};
use crate::mesh::{BroadcastReport, ConnectReport, MeshManager, MeshParams};
use crate::models::{JoinSnapshot, RoomAction, RoomView};
use crate::moderation::{BanList, LocalMedia};
use crate::transport::Transport;
use bytes::Bytes;
use chrono::Utc;
use common::secret::SecretString;
use common::types::{AdminAction, PeerId, RoomId, SessionId};
use mesh_protocol::transfer::FileDescriptor;
use mesh_protocol::{MediaKind, MeshMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Unjoined,
    Joining,
    Joined,
    Left,
}

/// What a successful join hands back.
#[derive(Debug)]
pub struct JoinedRoom {
    pub snapshot: JoinSnapshot,
    pub connections: ConnectReport,
    pub events: mpsc::Receiver<MeshEvent>,
}

struct Membership {
    room_id: RoomId,
    secret: SecretString,
    is_admin: bool,
    mesh: MeshManager,
}

/// One participant of one room.
pub struct Participant {
    directory: Arc<dyn RoomDirectory>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    session_id: SessionId,
    bans: Arc<BanList>,
    media: Arc<LocalMedia>,
    state: AdmissionState,
    membership: Option<Membership>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("peer_id", &self.transport.local_peer_id())
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Participant {
    pub fn new(
        directory: Arc<dyn RoomDirectory>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        session_id: SessionId,
        bans: Arc<BanList>,
    ) -> Self {
        Self {
            directory,
            transport,
            config,
            session_id,
            bans,
            media: Arc::new(LocalMedia::default()),
            state: AdmissionState::Unjoined,
            membership: None,
        }
    }

    /// Current state. A mesh closed by a kick or by transport loss reads as
    /// `Left`.
    #[must_use]
    pub fn state(&self) -> AdmissionState {
        match (&self.state, &self.membership) {
            (AdmissionState::Joined, Some(m)) if m.mesh.is_closed() => AdmissionState::Left,
            (state, _) => *state,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn local_media(&self) -> &Arc<LocalMedia> {
        &self.media
    }

    /// The mesh while joined.
    #[must_use]
    pub fn mesh(&self) -> Option<&MeshManager> {
        self.membership.as_ref().map(|m| &m.mesh)
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.membership.as_ref().map(|m| &m.room_id)
    }

    /// Create a room with this participant as creator. Does not join it.
    pub async fn create_room(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
    ) -> Result<RoomView, ClientError> {
        self.directory
            .create_room(room_id, secret, &self.peer_id())
            .await
    }

    /// Verify, join, and connect to every member already in the room.
    #[instrument(
        skip_all,
        name = "mesh.admission.join",
        fields(room_id = %room_id, peer_id = %self.peer_id())
    )]
    pub async fn join(
        &mut self,
        room_id: RoomId,
        secret: SecretString,
    ) -> Result<JoinedRoom, ClientError> {
        if self.state != AdmissionState::Unjoined {
            return Err(ClientError::InvalidState(format!(
                "Cannot join from {:?}",
                self.state()
            )));
        }

        if self.bans.is_banned(&room_id, &self.session_id).await {
            info!(target: "mesh.admission", "Join refused locally, session was kicked");
            return Err(ClientError::Forbidden(
                "This session was removed from the room".to_string(),
            ));
        }

        self.state = AdmissionState::Joining;
        let snapshot = match self.register(&room_id, &secret).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state = AdmissionState::Unjoined;
                info!(target: "mesh.admission", error = %e, "Join rejected");
                return Err(e);
            }
        };

        let params = MeshParams {
            room_id: room_id.clone(),
            session_id: self.session_id.clone(),
            creator_peer_id: snapshot.room.creator_peer_id.clone(),
            config: self.config.clone(),
        };
        let (mesh, events) = MeshManager::start(
            params,
            Arc::clone(&self.transport),
            Arc::clone(&self.media),
            Arc::clone(&self.bans),
        );

        if snapshot.user_state.is_muted {
            self.media.force_mute();
        }
        mesh.seed_chat(
            snapshot
                .history
                .iter()
                .map(|entry| ChatLine {
                    sender: entry.sender.clone(),
                    content: entry.content.clone(),
                    timestamp: entry.timestamp,
                })
                .collect(),
        )
        .await;

        let roster: Vec<PeerId> = snapshot.roster.iter().map(|m| m.peer_id.clone()).collect();
        let connections = mesh.connect_roster(&roster).await;

        info!(
            target: "mesh.admission",
            connected = connections.connected.len(),
            unreachable = connections.unreachable.len(),
            is_admin = snapshot.user_state.is_admin,
            "Joined room"
        );

        tokio::spawn(leave_on_transport_loss(
            mesh.clone(),
            Arc::clone(&self.directory),
            room_id.clone(),
            self.peer_id(),
        ));

        self.membership = Some(Membership {
            room_id,
            secret,
            is_admin: snapshot.user_state.is_admin,
            mesh,
        });
        self.state = AdmissionState::Joined;

        Ok(JoinedRoom {
            snapshot,
            connections,
            events,
        })
    }

    async fn register(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
    ) -> Result<JoinSnapshot, ClientError> {
        self.directory.verify_room(room_id, secret).await?;
        self.directory
            .join_room(room_id, &self.peer_id(), &self.session_id, secret)
            .await
    }

    /// Leave the room. Local resources are released even if the registry
    /// cannot be reached. Leaving twice is a no-op.
    #[instrument(skip_all, name = "mesh.admission.leave")]
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        let Some(membership) = self.membership.as_ref() else {
            self.state = AdmissionState::Left;
            return Ok(());
        };
        if self.state == AdmissionState::Left {
            return Ok(());
        }
        self.state = AdmissionState::Left;

        membership.mesh.shutdown().await;
        if membership.mesh.was_kicked() || membership.mesh.transport_lost() {
            // Already removed at the registry, by the kick or the loss watcher.
            return Ok(());
        }

        if let Err(e) = self
            .directory
            .leave_room(&membership.room_id, &self.peer_id())
            .await
        {
            warn!(target: "mesh.admission", error = %e, "Registry leave failed");
            return Err(e);
        }
        Ok(())
    }

    fn joined(&self) -> Result<&Membership, ClientError> {
        match (self.state(), self.membership.as_ref()) {
            (AdmissionState::Joined, Some(membership)) => Ok(membership),
            (state, _) => Err(ClientError::InvalidState(format!(
                "Not joined (state {state:?})"
            ))),
        }
    }

    /// Apply a moderation action at the registry, then mirror it to peers.
    #[instrument(skip_all, name = "mesh.admission.admin", fields(action = action.as_str()))]
    pub async fn admin_action(
        &self,
        action: AdminAction,
        target_peer_id: Option<PeerId>,
        target_session_id: Option<SessionId>,
    ) -> Result<RoomView, ClientError> {
        let membership = self.joined()?;
        let room = self
            .directory
            .perform_action(ActionCall {
                room_id: membership.room_id.clone(),
                action: RoomAction::from(action),
                acting_peer_id: self.peer_id(),
                target_peer_id: target_peer_id.clone(),
                target_session_id: target_session_id.clone(),
                secret: membership.secret.clone(),
            })
            .await?;

        if let (true, Some(target_peer_id)) = (action.targets_peer(), target_peer_id) {
            let report = membership
                .mesh
                .broadcast(MeshMessage::AdminAction {
                    action,
                    target_peer_id: target_peer_id.clone(),
                    target_session_id,
                })
                .await?;
            log_partial_broadcast("admin_action", &report);

            if action == AdminAction::Kick {
                membership.mesh.disconnect(&target_peer_id).await;
            }
        }
        Ok(room)
    }

    /// Whether the registry considers us the room admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.membership.as_ref().is_some_and(|m| m.is_admin)
    }

    /// Send a chat line to every peer and record it in the room history.
    /// The history write is best-effort.
    pub async fn send_chat(&self, content: &str) -> Result<BroadcastReport, ClientError> {
        let membership = self.joined()?;
        let report = membership
            .mesh
            .broadcast(MeshMessage::Chat {
                content: content.to_string(),
            })
            .await?;
        log_partial_broadcast("chat", &report);

        membership
            .mesh
            .record_chat(ChatLine {
                sender: self.peer_id(),
                content: content.to_string(),
                timestamp: Utc::now(),
            })
            .await;

        if let Err(e) = self
            .directory
            .add_message(&membership.room_id, &self.peer_id(), content)
            .await
        {
            warn!(target: "mesh.admission", error = %e, "Chat not stored in room history");
        }
        Ok(report)
    }

    /// Enable or disable outgoing audio and tell the peers.
    ///
    /// # Errors
    ///
    /// `Forbidden` when enabling while muted by the admin.
    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        let membership = self.joined()?;
        if self.media.set_audio(enabled)? {
            membership
                .mesh
                .broadcast(MeshMessage::MediaStateChange {
                    kind: MediaKind::Audio,
                    enabled,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        let membership = self.joined()?;
        if self.media.set_video(enabled) {
            membership
                .mesh
                .broadcast(MeshMessage::MediaStateChange {
                    kind: MediaKind::Video,
                    enabled,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn share_file(
        &self,
        file_name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<FileDescriptor, ClientError> {
        self.joined()?
            .mesh
            .share_file(file_name, mime_type, data)
            .await
    }

    /// Claim the room's single screen share slot.
    pub async fn start_screen_share(&self) -> Result<RoomView, ClientError> {
        self.screen_share(RoomAction::StartScreenShare).await
    }

    pub async fn stop_screen_share(&self) -> Result<RoomView, ClientError> {
        self.screen_share(RoomAction::StopScreenShare).await
    }

    async fn screen_share(&self, action: RoomAction) -> Result<RoomView, ClientError> {
        let membership = self.joined()?;
        self.directory
            .perform_action(ActionCall {
                room_id: membership.room_id.clone(),
                action,
                acting_peer_id: self.peer_id(),
                target_peer_id: None,
                target_session_id: None,
                secret: membership.secret.clone(),
            })
            .await
    }

    /// Tell peers this participant started or stopped recording.
    pub async fn announce_recording(&self, recording: bool) -> Result<BroadcastReport, ClientError> {
        let message = if recording {
            MeshMessage::RecordingStarted
        } else {
            MeshMessage::RecordingStopped
        };
        self.joined()?.mesh.broadcast(message).await
    }
}

/// Drop our registry membership once the mesh closed because the transport
/// went away. Leave and kick take care of their own registry state.
async fn leave_on_transport_loss(
    mesh: MeshManager,
    directory: Arc<dyn RoomDirectory>,
    room_id: RoomId,
    peer_id: PeerId,
) {
    mesh.closed().await;
    if !mesh.transport_lost() {
        return;
    }
    match directory.leave_room(&room_id, &peer_id).await {
        Ok(()) => info!(
            target: "mesh.admission",
            room_id = %room_id,
            "Left registry after transport loss"
        ),
        Err(e) => warn!(
            target: "mesh.admission",
            room_id = %room_id,
            error = %e,
            "Registry leave after transport loss failed"
        ),
    }
}

fn log_partial_broadcast(kind: &'static str, report: &BroadcastReport) {
    if !report.failed.is_empty() {
        warn!(
            target: "mesh.admission",
            kind = kind,
            failed = report.failed.len(),
            delivered = report.delivered.len(),
            "Broadcast did not reach every peer"
        );
    }
}
