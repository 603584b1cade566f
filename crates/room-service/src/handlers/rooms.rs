//! Room API handlers.
//!
//! - `POST /api/rooms/create` - Create a room
//! - `POST /api/rooms/verify` - Check a room secret
//! - `POST /api/rooms/join` - Join and receive the roster snapshot
//! - `POST /api/rooms/leave` - Leave (idempotent)
//! - `POST /api/rooms/actions` - Moderation and screen share actions
//! - `POST /api/rooms/messages` - Append to room chat history
//! - `GET /api/rooms` - Directory listing
//! - `GET /api/rooms/{room_id}` - Room details
//!
//! # Security
//!
//! Secrets arrive as `SecretString` and are only ever compared inside the
//! room actor. Log fields carry ids, never secrets.

use crate::actors::{ActionRequest, JoinOutcome};
use crate::errors::RoomError;
use crate::models::{
    ActionResponse, AddMessageRequest, CreateRoomRequest, JoinRoomRequest, LeaveResponse,
    LeaveRoomRequest, MessageResponse, RoomActionRequest, RoomListResponse, RoomResponse,
    VerifyRoomRequest,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::RoomId;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler for POST /api/rooms/create
///
/// # Response
///
/// - 201 Created: `{room}`
/// - 400 Bad Request: missing ids or secret
/// - 409 Conflict: room id already taken
#[instrument(skip_all, name = "rs.room.create", fields(room_id = %body.room_id))]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), RoomError> {
    let room = state
        .registry
        .create_room(body.room_id, body.secret, body.creator_peer_id)
        .await?;

    info!(
        target: "rs.handler",
        room_id = %room.room_id,
        creator_peer_id = %room.creator_peer_id,
        "Room created"
    );

    Ok((StatusCode::CREATED, Json(RoomResponse { room })))
}

/// Handler for POST /api/rooms/verify
#[instrument(skip_all, name = "rs.room.verify", fields(room_id = %body.room_id))]
pub async fn verify_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyRoomRequest>,
) -> Result<Json<RoomResponse>, RoomError> {
    let room = state
        .registry
        .verify_room(&body.room_id, body.secret)
        .await?;
    Ok(Json(RoomResponse { room }))
}

/// Handler for POST /api/rooms/join
///
/// # Response
///
/// - 200 OK: `{roster, userState, history, moderation, room}`
/// - 401 Unauthorized: wrong secret
/// - 403 Forbidden: banned session (code `FORBIDDEN`) or locked room (code `ROOM_LOCKED`)
/// - 404 Not Found: no such room
#[instrument(
    skip_all,
    name = "rs.room.join",
    fields(room_id = %body.room_id, peer_id = %body.peer_id)
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRoomRequest>,
) -> Result<Json<JoinOutcome>, RoomError> {
    let outcome = state
        .registry
        .join_room(&body.room_id, body.peer_id, body.session_id, body.secret)
        .await?;

    info!(
        target: "rs.handler",
        room_id = %body.room_id,
        roster_size = outcome.roster.len(),
        "Peer joined room"
    );

    Ok(Json(outcome))
}

/// Handler for POST /api/rooms/leave
///
/// Always answers `{ok: true}` once the peer is no longer a member, including
/// when the room or peer was already gone.
#[instrument(
    skip_all,
    name = "rs.room.leave",
    fields(room_id = %body.room_id, peer_id = %body.peer_id)
)]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LeaveRoomRequest>,
) -> Result<Json<LeaveResponse>, RoomError> {
    match state.registry.leave_room(&body.room_id, body.peer_id).await {
        Ok(outcome) => {
            debug!(
                target: "rs.handler",
                room_id = %body.room_id,
                remaining = outcome.remaining,
                room_closed = outcome.room_closed,
                "Peer left room"
            );
        }
        Err(RoomError::NotFound(_)) => {
            debug!(
                target: "rs.handler",
                room_id = %body.room_id,
                "Leave for absent room or peer"
            );
        }
        Err(e) => return Err(e),
    }

    Ok(Json(LeaveResponse { ok: true }))
}

/// Handler for POST /api/rooms/actions
///
/// # Response
///
/// - 200 OK: `{success: true, room}`
/// - 400 Bad Request: target missing for mute/unmute/kick
/// - 401 Unauthorized: acting peer is not the creator, or wrong secret
/// - 403 Forbidden: kicking the creator
/// - 404 Not Found: no such room, or target is not a member
/// - 409 Conflict: another peer is already sharing its screen
#[instrument(
    skip_all,
    name = "rs.room.action",
    fields(room_id = %body.room_id, action = body.action.as_str())
)]
pub async fn room_action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RoomActionRequest>,
) -> Result<Json<ActionResponse>, RoomError> {
    let request = ActionRequest {
        action: body.action,
        acting_peer_id: body.acting_peer_id,
        target_peer_id: body.target_peer_id,
        target_session_id: body.target_session_id,
        secret: body.secret,
    };

    let room = state.registry.apply_action(&body.room_id, request).await?;

    Ok(Json(ActionResponse {
        success: true,
        room,
    }))
}

/// Handler for POST /api/rooms/messages
#[instrument(
    skip_all,
    name = "rs.room.message",
    fields(room_id = %body.room_id, peer_id = %body.peer_id)
)]
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), RoomError> {
    let message = state
        .registry
        .add_message(&body.room_id, body.peer_id, body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

/// Handler for GET /api/rooms
#[instrument(skip_all, name = "rs.room.list")]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomListResponse>, RoomError> {
    let rooms = state.registry.list_rooms().await?;
    Ok(Json(rooms.into_iter().collect()))
}

/// Handler for GET /api/rooms/{room_id}
#[instrument(skip_all, name = "rs.room.info", fields(room_id = %room_id))]
pub async fn room_info(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<RoomResponse>, RoomError> {
    let room = state.registry.room_info(&room_id).await?;
    Ok(Json(RoomResponse { room }))
}
