//! Room service response bodies as seen by a participant.

use chrono::{DateTime, Utc};
use common::types::{AdminAction, PeerId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action names accepted by the room service's actions endpoint.
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationView {
    pub muted_peers: Vec<PeerId>,
    pub is_locked: bool,
    pub screen_sharer: Option<PeerId>,
    pub banned_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: RoomId,
    pub creator_peer_id: PeerId,
    pub peers: Vec<PeerId>,
    pub peer_count: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    pub moderation: ModerationView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub peer_id: PeerId,
    pub is_admin: bool,
    pub is_muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub is_admin: bool,
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    pub sender: PeerId,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Body of a successful join: everything needed to build the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSnapshot {
    /// Other members, never including the joining peer.
    pub roster: Vec<MemberView>,
    pub user_state: UserState,
    pub history: Vec<ChatRecord>,
    pub moderation: ModerationView,
    pub room: RoomView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListing {
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

/// `GET /api/rooms`.
pub type RoomDirectoryListing = BTreeMap<RoomId, RoomListing>;

#[derive(Debug, Deserialize)]
pub(crate) struct RoomEnvelope {
    pub room: RoomView,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionEnvelope {
    pub room: RoomView,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageEnvelope {
    pub message: ChatRecord,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_snapshot_parses_service_shape() {
        let body = json!({
            "roster": [{"peerId": "A", "isAdmin": true, "isMuted": false}],
            "userState": {"isAdmin": false, "isMuted": false},
            "history": [{"id": "m1", "sender": "A", "content": "hi", "timestamp": 1_700_000_000_000_i64}],
            "moderation": {"mutedPeers": [], "isLocked": false, "screenSharer": null, "bannedCount": 0},
            "room": {
                "roomId": "r1", "creatorPeerId": "A", "peers": ["A", "B"], "peerCount": 2,
                "createdAt": 1_700_000_000_000_i64, "lastActivity": 1_700_000_000_500_i64,
                "moderation": {"mutedPeers": [], "isLocked": false, "screenSharer": null, "bannedCount": 0}
            }
        });

        let snapshot: JoinSnapshot = serde_json::from_value(body).unwrap();
        assert_eq!(snapshot.roster.len(), 1);
        assert_eq!(snapshot.roster[0].peer_id, PeerId::from("A"));
        assert!(snapshot.roster[0].is_admin);
        assert_eq!(snapshot.history[0].content, "hi");
        assert_eq!(snapshot.room.peer_count, 2);
    }

    #[test]
    fn test_room_action_wire_names() {
        assert_eq!(
            serde_json::to_value(RoomAction::StartScreenShare).unwrap(),
            json!("start_screen_share")
        );
        assert_eq!(RoomAction::from(AdminAction::Kick), RoomAction::Kick);
    }
}
