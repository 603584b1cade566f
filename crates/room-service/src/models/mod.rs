//! Request and response bodies of the room API.
//!
//! All bodies use camelCase field names. Secrets deserialize straight into
//! `SecretString` so they never appear in `Debug` output or logs.

use crate::actors::{ChatEntry, RoomAction, RoomSnapshot, RoomSummary};
use common::secret::SecretString;
use common::types::{PeerId, RoomId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /api/rooms/create`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_id: RoomId,
    pub secret: SecretString,
    pub creator_peer_id: PeerId,
}

/// `POST /api/rooms/verify`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRoomRequest {
    pub room_id: RoomId,
    pub secret: SecretString,
}

/// `POST /api/rooms/join`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub secret: SecretString,
    pub session_id: SessionId,
}

/// `POST /api/rooms/leave`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

/// `POST /api/rooms/actions`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomActionRequest {
    pub room_id: RoomId,
    pub action: RoomAction,
    #[serde(default)]
    pub target_peer_id: Option<PeerId>,
    #[serde(default)]
    pub target_session_id: Option<SessionId>,
    pub acting_peer_id: PeerId,
    pub secret: SecretString,
}

/// `POST /api/rooms/messages`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageRequest {
    pub room_id: RoomId,
    pub peer_id: PeerId,
    pub content: String,
}

/// Body of create, verify and room info responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room: RoomSnapshot,
}

/// Body of a successful action.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub room: RoomSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: ChatEntry,
}

/// `GET /api/rooms`: room id to summary, ordered by id.
pub type RoomListResponse = BTreeMap<RoomId, RoomSummary>;
