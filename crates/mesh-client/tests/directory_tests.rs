//! Room service client tests.
//!
//! Uses wiremock to stand in for the room service so request shapes and
//! error mapping can be checked without a running registry.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::secret::SecretString;
use common::types::{PeerId, RoomId, SessionId};
use mesh_client::config::ClientConfig;
use mesh_client::directory::{ActionCall, HttpRoomDirectory, RoomDirectory};
use mesh_client::models::RoomAction;
use mesh_client::ClientError;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

fn directory(server: &MockServer) -> HttpRoomDirectory {
    let config = ClientConfig {
        room_service_url: server.uri(),
        http_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    };
    HttpRoomDirectory::new(&config).unwrap()
}

fn room_json(room_id: &str, peers: &[&str]) -> Value {
    json!({
        "roomId": room_id,
        "creatorPeerId": "A",
        "peers": peers,
        "peerCount": peers.len(),
        "createdAt": 1_700_000_000_000_i64,
        "lastActivity": 1_700_000_000_500_i64,
        "moderation": {
            "mutedPeers": [],
            "isLocked": false,
            "screenSharer": null,
            "bannedCount": 0
        }
    })
}

fn error_json(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test]
async fn test_join_sends_camel_case_body_and_parses_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/join"))
        .and(body_partial_json(json!({
            "roomId": "r1",
            "peerId": "B",
            "sessionId": "sB",
            "secret": "abcd"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roster": [{ "peerId": "A", "isAdmin": true, "isMuted": false }],
            "userState": { "isAdmin": false, "isMuted": true },
            "history": [{
                "id": "m1",
                "sender": "A",
                "content": "welcome",
                "timestamp": 1_700_000_000_100_i64
            }],
            "moderation": {
                "mutedPeers": ["B"],
                "isLocked": false,
                "screenSharer": null,
                "bannedCount": 0
            },
            "room": room_json("r1", &["A", "B"])
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = directory(&server)
        .join_room(
            &RoomId::from("r1"),
            &PeerId::from("B"),
            &SessionId::from("sB"),
            &SecretString::from("abcd"),
        )
        .await
        .unwrap();

    assert_eq!(snapshot.roster.len(), 1);
    assert_eq!(snapshot.roster[0].peer_id, PeerId::from("A"));
    assert!(snapshot.roster[0].is_admin);
    assert!(snapshot.user_state.is_muted);
    assert_eq!(snapshot.history[0].content, "welcome");
    assert_eq!(snapshot.history[0].timestamp.timestamp_millis(), 1_700_000_000_100);
    assert_eq!(snapshot.room.peer_count, 2);
}

#[tokio::test]
async fn test_action_body_carries_targets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/actions"))
        .and(body_partial_json(json!({
            "roomId": "r1",
            "action": "kick",
            "targetPeerId": "B",
            "targetSessionId": "sB",
            "actingPeerId": "A"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "room": room_json("r1", &["A"]) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let room = directory(&server)
        .perform_action(ActionCall {
            room_id: RoomId::from("r1"),
            action: RoomAction::Kick,
            acting_peer_id: PeerId::from("A"),
            target_peer_id: Some(PeerId::from("B")),
            target_session_id: Some(SessionId::from("sB")),
            secret: SecretString::from("abcd"),
        })
        .await
        .unwrap();

    assert_eq!(room.peers, vec![PeerId::from("A")]);
}

#[tokio::test]
async fn test_list_rooms_and_room_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "r1": {
                "peerCount": 2,
                "createdAt": 1_700_000_000_000_i64,
                "lastActivity": 1_700_000_000_000_i64,
                "isLocked": true,
                "mutedCount": 0,
                "bannedCount": 1,
                "screenSharing": false
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rooms/r1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "room": room_json("r1", &["A"]) })),
        )
        .mount(&server)
        .await;

    let directory = directory(&server);
    let rooms = directory.list_rooms().await.unwrap();
    let r1 = rooms.get(&RoomId::from("r1")).unwrap();
    assert_eq!(r1.peer_count, 2);
    assert!(r1.is_locked);

    let info = directory.room_info(&RoomId::from("r1")).await.unwrap();
    assert_eq!(info.creator_peer_id, PeerId::from("A"));
}

#[tokio::test]
async fn test_leave_ignores_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/leave"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    directory(&server)
        .leave_room(&RoomId::from("r1"), &PeerId::from("B"))
        .await
        .unwrap();
}

// ============================================================================
// Error mapping
// ============================================================================

#[tokio::test]
async fn test_error_codes_map_to_typed_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/join"))
        .respond_with(ResponseTemplate::new(403).set_body_json(error_json("ROOM_LOCKED", "Room is locked")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/verify"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(error_json("UNAUTHORIZED", "Invalid secret")),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/create"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(error_json("ALREADY_EXISTS", "Room already exists")),
        )
        .mount(&server)
        .await;

    let directory = directory(&server);
    let room = RoomId::from("r1");
    let secret = SecretString::from("abcd");

    let join = directory
        .join_room(&room, &PeerId::from("B"), &SessionId::from("sB"), &secret)
        .await;
    let verify = directory.verify_room(&room, &secret).await;
    let create = directory
        .create_room(&room, &secret, &PeerId::from("A"))
        .await;

    assert!(matches!(join, Err(ClientError::Locked)));
    assert!(matches!(verify, Err(ClientError::Unauthorized(msg)) if msg == "Invalid secret"));
    assert!(matches!(create, Err(ClientError::AlreadyExists)));
}

#[tokio::test]
async fn test_error_without_body_falls_back_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rooms/r1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = directory(&server).room_info(&RoomId::from("r1")).await;

    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

#[tokio::test]
async fn test_slow_service_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/rooms/verify"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "room": room_json("r1", &[]) }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = directory(&server)
        .verify_room(&RoomId::from("r1"), &SecretString::from("abcd"))
        .await;

    assert!(matches!(result, Err(ClientError::Unavailable(_))));
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    let config = ClientConfig {
        // Reserved port, nothing listens there.
        room_service_url: "http://127.0.0.1:9".to_string(),
        http_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    };
    let directory = HttpRoomDirectory::new(&config).unwrap();

    let result = directory.list_rooms().await;

    assert!(matches!(result, Err(ClientError::Unavailable(_))));
}
