//! Message and snapshot types for the registry actor hierarchy.
//!
//! Requests carry a `respond_to` oneshot; the snapshot types double as the
//! JSON bodies returned by the HTTP layer.

use crate::actors::room::RoomActorHandle;
use crate::errors::RoomError;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{AdminAction, PeerId, RoomId, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages handled by the registry (supervisor) actor.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a new room.
    CreateRoom {
        room_id: RoomId,
        secret: SecretString,
        creator_peer_id: PeerId,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    /// Resolve a room id to its actor handle.
    LookupRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RoomError>>,
    },

    /// A room actor reached the empty state and stopped accepting work.
    RoomClosed {
        room_id: RoomId,
        generation: u64,
        respond_to: oneshot::Sender<()>,
    },

    /// Snapshot of every active room.
    ListRooms {
        respond_to: oneshot::Sender<Vec<(RoomId, RoomSummary)>>,
    },

    /// Registry status.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting new rooms and cancel all room actors.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// Messages handled by a single room actor.
#[derive(Debug)]
pub enum RoomMessage {
    Verify {
        secret: SecretString,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    Join {
        peer_id: PeerId,
        session_id: SessionId,
        secret: SecretString,
        respond_to: oneshot::Sender<Result<JoinOutcome, RoomError>>,
    },

    Leave {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<LeaveOutcome, RoomError>>,
    },

    Action {
        request: ActionRequest,
        respond_to: oneshot::Sender<Result<RoomSnapshot, RoomError>>,
    },

    AddMessage {
        peer_id: PeerId,
        content: String,
        respond_to: oneshot::Sender<Result<ChatEntry, RoomError>>,
    },

    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Action accepted by `POST /api/rooms/actions`.
///
/// The moderation actions are creator-only; screen share arbitration is open
/// to any member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomAction {
    Mute,
    Unmute,
    Kick,
    Lock,
    Unlock,
    StartScreenShare,
    StopScreenShare,
}

impl RoomAction {
    /// The moderation action this maps to, if any.
    #[must_use]
    pub const fn as_admin(self) -> Option<AdminAction> {
        match self {
            Self::Mute => Some(AdminAction::Mute),
            Self::Unmute => Some(AdminAction::Unmute),
            Self::Kick => Some(AdminAction::Kick),
            Self::Lock => Some(AdminAction::Lock),
            Self::Unlock => Some(AdminAction::Unlock),
            Self::StartScreenShare | Self::StopScreenShare => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Kick => "kick",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::StartScreenShare => "start_screen_share",
            Self::StopScreenShare => "stop_screen_share",
        }
    }
}

impl From<AdminAction> for RoomAction {
    fn from(action: AdminAction) -> Self {
        match action {
            AdminAction::Mute => Self::Mute,
            AdminAction::Unmute => Self::Unmute,
            AdminAction::Kick => Self::Kick,
            AdminAction::Lock => Self::Lock,
            AdminAction::Unlock => Self::Unlock,
        }
    }
}

/// A validated action request.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: RoomAction,
    pub acting_peer_id: PeerId,
    pub target_peer_id: Option<PeerId>,
    pub target_session_id: Option<SessionId>,
    pub secret: SecretString,
}

/// One chat line retained in room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: String,
    pub sender: PeerId,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Flags of one member as seen by the joining participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub peer_id: PeerId,
    pub is_admin: bool,
    pub is_muted: bool,
}

/// Flags of the joining participant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub is_admin: bool,
    pub is_muted: bool,
}

/// Moderation state. Banned session ids are reported as a count only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationSnapshot {
    pub muted_peers: Vec<PeerId>,
    pub is_locked: bool,
    pub screen_sharer: Option<PeerId>,
    pub banned_count: usize,
}

/// Full view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub creator_peer_id: PeerId,
    pub peers: Vec<PeerId>,
    pub peer_count: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    pub moderation: ModerationSnapshot,
}

impl RoomSnapshot {
    /// Snapshot of a freshly created room: no members, default moderation.
    #[must_use]
    pub fn empty(room_id: RoomId, creator_peer_id: PeerId, created_at: DateTime<Utc>) -> Self {
        Self {
            room_id,
            creator_peer_id,
            peers: Vec::new(),
            peer_count: 0,
            created_at,
            last_activity: created_at,
            moderation: ModerationSnapshot {
                muted_peers: Vec::new(),
                is_locked: false,
                screen_sharer: None,
                banned_count: 0,
            },
        }
    }
}

/// Directory listing entry, published by each room after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub peer_count: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    pub is_locked: bool,
    pub muted_count: usize,
    pub banned_count: usize,
    pub screen_sharing: bool,
}

impl From<&RoomSnapshot> for RoomSummary {
    fn from(snapshot: &RoomSnapshot) -> Self {
        Self {
            peer_count: snapshot.peer_count,
            created_at: snapshot.created_at,
            last_activity: snapshot.last_activity,
            is_locked: snapshot.moderation.is_locked,
            muted_count: snapshot.moderation.muted_peers.len(),
            banned_count: snapshot.moderation.banned_count,
            screen_sharing: snapshot.moderation.screen_sharer.is_some(),
        }
    }
}

/// Everything a participant needs after a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    /// Other members, excluding the joining peer.
    pub roster: Vec<MemberInfo>,
    pub user_state: UserState,
    pub history: Vec<ChatEntry>,
    pub moderation: ModerationSnapshot,
    pub room: RoomSnapshot,
}

/// Result of removing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: usize,
    /// True when this removal emptied and closed the room.
    pub room_closed: bool,
}

/// Registry status snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_action_wire_names() {
        let action: RoomAction = serde_json::from_str("\"start_screen_share\"").unwrap();
        assert_eq!(action, RoomAction::StartScreenShare);
        assert_eq!(action.as_admin(), None);

        let kick: RoomAction = serde_json::from_str("\"kick\"").unwrap();
        assert_eq!(kick.as_admin(), Some(AdminAction::Kick));
        assert_eq!(RoomAction::from(AdminAction::Lock), RoomAction::Lock);
    }

    #[test]
    fn test_snapshot_serializes_camel_case_millis() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let snapshot = RoomSnapshot {
            room_id: RoomId::from("r1"),
            creator_peer_id: PeerId::from("A"),
            peers: vec![PeerId::from("A")],
            peer_count: 1,
            created_at: at,
            last_activity: at,
            moderation: ModerationSnapshot {
                muted_peers: vec![],
                is_locked: false,
                screen_sharer: None,
                banned_count: 0,
            },
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["roomId"], "r1");
        assert_eq!(value["creatorPeerId"], "A");
        assert_eq!(value["createdAt"], 1_700_000_000_123_i64);
        assert_eq!(value["moderation"]["isLocked"], false);

        let summary = RoomSummary::from(&snapshot);
        assert_eq!(summary.peer_count, 1);
        assert!(!summary.screen_sharing);
    }
}
