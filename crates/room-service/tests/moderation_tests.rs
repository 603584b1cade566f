//! Moderation integration tests.
//!
//! Covers `POST /api/rooms/actions`: creator-only mute, unmute, kick, lock
//! and unlock, plus screen share arbitration which any member may use.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use mesh_test_utils::TestRoomServer;
use reqwest::StatusCode;
use serde_json::{json, Value};

// ============================================================================
// Test Helpers
// ============================================================================

async fn post(server: &TestRoomServer, path: &str, body: Value) -> Result<(StatusCode, Value)> {
    let response = reqwest::Client::new()
        .post(format!("{}/api/rooms/{path}", server.url()))
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

async fn join(server: &TestRoomServer, peer: &str, session: &str) -> Result<(StatusCode, Value)> {
    post(
        server,
        "join",
        json!({ "roomId": "r1", "peerId": peer, "sessionId": session, "secret": "abcd" }),
    )
    .await
}

async fn action(
    server: &TestRoomServer,
    acting: &str,
    action: &str,
    target: Option<&str>,
) -> Result<(StatusCode, Value)> {
    post(
        server,
        "actions",
        json!({
            "roomId": "r1",
            "action": action,
            "targetPeerId": target,
            "actingPeerId": acting,
            "secret": "abcd",
        }),
    )
    .await
}

/// Room r1 created by A, with A and B joined.
async fn room_with_two_members() -> Result<TestRoomServer> {
    let server = TestRoomServer::spawn().await?;
    post(
        &server,
        "create",
        json!({ "roomId": "r1", "secret": "abcd", "creatorPeerId": "A" }),
    )
    .await?;
    join(&server, "A", "sA").await?;
    join(&server, "B", "sB").await?;
    Ok(server)
}

// ============================================================================
// Mute
// ============================================================================

#[tokio::test]
async fn test_creator_mutes_and_unmutes() -> Result<()> {
    let server = room_with_two_members().await?;

    let (status, body) = action(&server, "A", "mute", Some("B")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["room"]["moderation"]["mutedPeers"], json!(["B"]));

    let (status, body) = action(&server, "A", "unmute", Some("B")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room"]["moderation"]["mutedPeers"], json!([]));
    Ok(())
}

#[tokio::test]
async fn test_non_creator_cannot_moderate() -> Result<()> {
    let server = room_with_two_members().await?;
    action(&server, "A", "mute", Some("B")).await?;

    let (mute, mute_body) = action(&server, "B", "mute", Some("A")).await?;
    let (unmute, _) = action(&server, "B", "unmute", Some("B")).await?;
    let (lock, _) = action(&server, "B", "lock", None).await?;

    assert_eq!(mute, StatusCode::UNAUTHORIZED);
    assert_eq!(mute_body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(unmute, StatusCode::UNAUTHORIZED);
    assert_eq!(lock, StatusCode::UNAUTHORIZED);

    let response = reqwest::get(format!("{}/api/rooms/r1", server.url())).await?;
    let info: Value = response.json().await?;
    assert_eq!(info["room"]["moderation"]["mutedPeers"], json!(["B"]));
    assert_eq!(info["room"]["moderation"]["isLocked"], false);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_non_creator_actions_leave_state_unchanged() -> Result<()> {
    let server = room_with_two_members().await?;

    let (mute, unmute) = tokio::join!(
        action(&server, "B", "mute", Some("A")),
        action(&server, "B", "unmute", Some("A")),
    );

    assert_eq!(mute?.0, StatusCode::UNAUTHORIZED);
    assert_eq!(unmute?.0, StatusCode::UNAUTHORIZED);

    let response = reqwest::get(format!("{}/api/rooms/r1", server.url())).await?;
    let info: Value = response.json().await?;
    assert_eq!(info["room"]["moderation"]["mutedPeers"], json!([]));
    Ok(())
}

#[tokio::test]
async fn test_targeted_action_requires_member_target() -> Result<()> {
    let server = room_with_two_members().await?;

    let (missing, _) = action(&server, "A", "mute", None).await?;
    let (stranger, _) = action(&server, "A", "mute", Some("Z")).await?;

    assert_eq!(missing, StatusCode::BAD_REQUEST);
    assert_eq!(stranger, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_mute_carries_over_rejoin() -> Result<()> {
    let server = room_with_two_members().await?;
    action(&server, "A", "mute", Some("B")).await?;
    post(&server, "leave", json!({ "roomId": "r1", "peerId": "B" })).await?;

    let (status, body) = join(&server, "B2", "sB").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userState"]["isMuted"], true);
    Ok(())
}

// ============================================================================
// Kick
// ============================================================================

#[tokio::test]
async fn test_kick_bans_session_not_device() -> Result<()> {
    let server = room_with_two_members().await?;

    let (status, body) = action(&server, "A", "kick", Some("B")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room"]["peers"], json!(["A"]));
    assert_eq!(body["room"]["moderation"]["bannedCount"], 1);

    let (banned, banned_body) = join(&server, "B2", "sB").await?;
    assert_eq!(banned, StatusCode::FORBIDDEN);
    assert_eq!(banned_body["error"]["code"], "FORBIDDEN");

    let (fresh, _) = join(&server, "B3", "sB-new").await?;
    assert_eq!(fresh, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_creator_cannot_be_kicked() -> Result<()> {
    let server = room_with_two_members().await?;

    let (status, body) = action(&server, "A", "kick", Some("A")).await?;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    Ok(())
}

// ============================================================================
// Lock
// ============================================================================

#[tokio::test]
async fn test_lock_blocks_new_members_but_not_creator() -> Result<()> {
    let server = room_with_two_members().await?;

    let (first, _) = action(&server, "A", "lock", None).await?;
    let (second, body) = action(&server, "A", "lock", None).await?;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["room"]["moderation"]["isLocked"], true);

    let (locked, locked_body) = join(&server, "C", "sC").await?;
    assert_eq!(locked, StatusCode::FORBIDDEN);
    assert_eq!(locked_body["error"]["code"], "ROOM_LOCKED");

    let (creator, _) = join(&server, "A", "sA").await?;
    assert_eq!(creator, StatusCode::OK);

    action(&server, "A", "unlock", None).await?;
    let (unlocked, _) = join(&server, "C", "sC").await?;
    assert_eq!(unlocked, StatusCode::OK);
    Ok(())
}

// ============================================================================
// Screen share
// ============================================================================

#[tokio::test]
async fn test_single_screen_sharer() -> Result<()> {
    let server = room_with_two_members().await?;

    let (status, body) = action(&server, "B", "start_screen_share", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room"]["moderation"]["screenSharer"], "B");

    let (conflict, conflict_body) = action(&server, "A", "start_screen_share", None).await?;
    assert_eq!(conflict, StatusCode::CONFLICT);
    assert_eq!(conflict_body["error"]["code"], "CONFLICT");

    // Stopping someone else's share is a no-op.
    let (_, body) = action(&server, "A", "stop_screen_share", None).await?;
    assert_eq!(body["room"]["moderation"]["screenSharer"], "B");

    let (_, body) = action(&server, "B", "stop_screen_share", None).await?;
    assert_eq!(body["room"]["moderation"]["screenSharer"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_sharer_leaving_frees_the_slot() -> Result<()> {
    let server = room_with_two_members().await?;
    action(&server, "B", "start_screen_share", None).await?;

    post(&server, "leave", json!({ "roomId": "r1", "peerId": "B" })).await?;

    let (status, body) = action(&server, "A", "start_screen_share", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room"]["moderation"]["screenSharer"], "A");
    Ok(())
}
