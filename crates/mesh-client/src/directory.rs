//! Room service client.
//!
//! [`RoomDirectory`] is the participant's view of the authoritative registry.
//! [`HttpRoomDirectory`] talks to the room service's JSON API; the [`mock`]
//! module provides a scripted stand-in for admission tests.
//!
//! # Security
//!
//! Secrets are only exposed while serializing a request body. Neither the
//! request nor the error paths log them.

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::models::{
    ActionEnvelope, ChatRecord, ErrorEnvelope, JoinSnapshot, MessageEnvelope, RoomAction,
    RoomDirectoryListing, RoomEnvelope, RoomView,
};
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{PeerId, RoomId, SessionId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

/// A moderation or screen share request.
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub room_id: RoomId,
    pub action: RoomAction,
    pub acting_peer_id: PeerId,
    pub target_peer_id: Option<PeerId>,
    pub target_session_id: Option<SessionId>,
    pub secret: SecretString,
}

/// Operations a participant performs against the registry.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn create_room(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
        creator_peer_id: &PeerId,
    ) -> Result<RoomView, ClientError>;

    async fn verify_room(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
    ) -> Result<RoomView, ClientError>;

    async fn join_room(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        session_id: &SessionId,
        secret: &SecretString,
    ) -> Result<JoinSnapshot, ClientError>;

    async fn leave_room(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), ClientError>;

    async fn perform_action(&self, call: ActionCall) -> Result<RoomView, ClientError>;

    async fn add_message(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        content: &str,
    ) -> Result<ChatRecord, ClientError>;

    async fn list_rooms(&self) -> Result<RoomDirectoryListing, ClientError>;

    async fn room_info(&self, room_id: &RoomId) -> Result<RoomView, ClientError>;
}

/// JSON-over-HTTP room service client.
#[derive(Debug, Clone)]
pub struct HttpRoomDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoomDirectory {
    /// Build a client for `config.room_service_url`.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ClientError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.room_service_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Internal(format!("Invalid room service URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::Internal("Room service URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        let url = self.url(&["api", "rooms", path])?;
        let response = self.client.post(url).json(&body).send().await?;
        Self::decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let response = self.client.get(self.url(segments)?).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                ClientError::Internal(format!("Malformed room service response: {e}"))
            });
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => Err(ClientError::from_service(
                status.as_u16(),
                &envelope.error.code,
                envelope.error.message,
            )),
            Err(_) => {
                warn!(
                    target: "mesh.directory",
                    status = status.as_u16(),
                    "Room service returned an error without a body"
                );
                Err(ClientError::from_service(status.as_u16(), "", text))
            }
        }
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    #[instrument(skip_all, name = "mesh.directory.create", fields(room_id = %room_id))]
    async fn create_room(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
        creator_peer_id: &PeerId,
    ) -> Result<RoomView, ClientError> {
        let body = json!({
            "roomId": room_id,
            "secret": secret.expose_secret(),
            "creatorPeerId": creator_peer_id,
        });
        let envelope: RoomEnvelope = self.post("create", body).await?;
        Ok(envelope.room)
    }

    #[instrument(skip_all, name = "mesh.directory.verify", fields(room_id = %room_id))]
    async fn verify_room(
        &self,
        room_id: &RoomId,
        secret: &SecretString,
    ) -> Result<RoomView, ClientError> {
        let body = json!({
            "roomId": room_id,
            "secret": secret.expose_secret(),
        });
        let envelope: RoomEnvelope = self.post("verify", body).await?;
        Ok(envelope.room)
    }

    #[instrument(
        skip_all,
        name = "mesh.directory.join",
        fields(room_id = %room_id, peer_id = %peer_id)
    )]
    async fn join_room(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        session_id: &SessionId,
        secret: &SecretString,
    ) -> Result<JoinSnapshot, ClientError> {
        let body = json!({
            "roomId": room_id,
            "peerId": peer_id,
            "secret": secret.expose_secret(),
            "sessionId": session_id,
        });
        self.post("join", body).await
    }

    #[instrument(
        skip_all,
        name = "mesh.directory.leave",
        fields(room_id = %room_id, peer_id = %peer_id)
    )]
    async fn leave_room(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), ClientError> {
        let body = json!({ "roomId": room_id, "peerId": peer_id });
        let _: Value = self.post("leave", body).await?;
        debug!(target: "mesh.directory", "Left room");
        Ok(())
    }

    #[instrument(
        skip_all,
        name = "mesh.directory.action",
        fields(room_id = %call.room_id, action = ?call.action)
    )]
    async fn perform_action(&self, call: ActionCall) -> Result<RoomView, ClientError> {
        let body = json!({
            "roomId": call.room_id,
            "action": call.action,
            "targetPeerId": call.target_peer_id,
            "targetSessionId": call.target_session_id,
            "actingPeerId": call.acting_peer_id,
            "secret": call.secret.expose_secret(),
        });
        let envelope: ActionEnvelope = self.post("actions", body).await?;
        Ok(envelope.room)
    }

    async fn add_message(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        content: &str,
    ) -> Result<ChatRecord, ClientError> {
        let body = json!({
            "roomId": room_id,
            "peerId": peer_id,
            "content": content,
        });
        let envelope: MessageEnvelope = self.post("messages", body).await?;
        Ok(envelope.message)
    }

    async fn list_rooms(&self) -> Result<RoomDirectoryListing, ClientError> {
        self.get(&["api", "rooms"]).await
    }

    async fn room_info(&self, room_id: &RoomId) -> Result<RoomView, ClientError> {
        let envelope: RoomEnvelope = self.get(&["api", "rooms", room_id.as_str()]).await?;
        Ok(envelope.room)
    }
}

/// Scripted directory for admission tests.
pub mod mock {
    use super::*;
    use crate::models::{ModerationView, UserState};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Failure a scripted call should produce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockFailure {
        NotFound,
        Unauthorized,
        Forbidden,
        Locked,
        Unavailable,
    }

    impl MockFailure {
        fn to_error(self) -> ClientError {
            match self {
                Self::NotFound => ClientError::NotFound("Room not found".to_string()),
                Self::Unauthorized => ClientError::Unauthorized("Invalid secret".to_string()),
                Self::Forbidden => ClientError::Forbidden("Session is banned".to_string()),
                Self::Locked => ClientError::Locked,
                Self::Unavailable => ClientError::Unavailable("mock offline".to_string()),
            }
        }
    }

    /// Mock directory: every call succeeds against one fixed room unless a
    /// failure was scripted for it.
    pub struct MockRoomDirectory {
        room: RoomView,
        snapshot: JoinSnapshot,
        join_failure: Option<MockFailure>,
        action_failure: Option<MockFailure>,
        leave_failure: Option<MockFailure>,
        verify_calls: AtomicUsize,
        join_calls: AtomicUsize,
        leave_calls: AtomicUsize,
        action_calls: AtomicUsize,
        message_calls: AtomicUsize,
    }

    impl MockRoomDirectory {
        /// A room created by `creator` that accepts every join.
        #[must_use]
        pub fn accepting(room_id: &str, creator: &str) -> Self {
            let now = Utc::now();
            let moderation = ModerationView {
                muted_peers: Vec::new(),
                is_locked: false,
                screen_sharer: None,
                banned_count: 0,
            };
            let room = RoomView {
                room_id: RoomId::from(room_id),
                creator_peer_id: PeerId::from(creator),
                peers: Vec::new(),
                peer_count: 0,
                created_at: now,
                last_activity: now,
                moderation: moderation.clone(),
            };
            let snapshot = JoinSnapshot {
                roster: Vec::new(),
                user_state: UserState {
                    is_admin: false,
                    is_muted: false,
                },
                history: Vec::new(),
                moderation,
                room: room.clone(),
            };
            Self {
                room,
                snapshot,
                join_failure: None,
                action_failure: None,
                leave_failure: None,
                verify_calls: AtomicUsize::new(0),
                join_calls: AtomicUsize::new(0),
                leave_calls: AtomicUsize::new(0),
                action_calls: AtomicUsize::new(0),
                message_calls: AtomicUsize::new(0),
            }
        }

        /// Replace the snapshot returned by successful joins.
        #[must_use]
        pub fn with_snapshot(mut self, snapshot: JoinSnapshot) -> Self {
            self.snapshot = snapshot;
            self
        }

        #[must_use]
        pub fn failing_join(mut self, failure: MockFailure) -> Self {
            self.join_failure = Some(failure);
            self
        }

        #[must_use]
        pub fn failing_actions(mut self, failure: MockFailure) -> Self {
            self.action_failure = Some(failure);
            self
        }

        #[must_use]
        pub fn failing_leave(mut self, failure: MockFailure) -> Self {
            self.leave_failure = Some(failure);
            self
        }

        pub fn verify_calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }

        pub fn join_calls(&self) -> usize {
            self.join_calls.load(Ordering::SeqCst)
        }

        pub fn leave_calls(&self) -> usize {
            self.leave_calls.load(Ordering::SeqCst)
        }

        pub fn action_calls(&self) -> usize {
            self.action_calls.load(Ordering::SeqCst)
        }

        pub fn message_calls(&self) -> usize {
            self.message_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoomDirectory for MockRoomDirectory {
        async fn create_room(
            &self,
            _room_id: &RoomId,
            _secret: &SecretString,
            _creator_peer_id: &PeerId,
        ) -> Result<RoomView, ClientError> {
            Ok(self.room.clone())
        }

        async fn verify_room(
            &self,
            _room_id: &RoomId,
            _secret: &SecretString,
        ) -> Result<RoomView, ClientError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.room.clone())
        }

        async fn join_room(
            &self,
            _room_id: &RoomId,
            _peer_id: &PeerId,
            _session_id: &SessionId,
            _secret: &SecretString,
        ) -> Result<JoinSnapshot, ClientError> {
            self.join_calls.fetch_add(1, Ordering::SeqCst);
            match self.join_failure {
                Some(failure) => Err(failure.to_error()),
                None => Ok(self.snapshot.clone()),
            }
        }

        async fn leave_room(
            &self,
            _room_id: &RoomId,
            _peer_id: &PeerId,
        ) -> Result<(), ClientError> {
            self.leave_calls.fetch_add(1, Ordering::SeqCst);
            match self.leave_failure {
                Some(failure) => Err(failure.to_error()),
                None => Ok(()),
            }
        }

        async fn perform_action(&self, _call: ActionCall) -> Result<RoomView, ClientError> {
            self.action_calls.fetch_add(1, Ordering::SeqCst);
            match self.action_failure {
                Some(failure) => Err(failure.to_error()),
                None => Ok(self.room.clone()),
            }
        }

        async fn add_message(
            &self,
            _room_id: &RoomId,
            peer_id: &PeerId,
            content: &str,
        ) -> Result<ChatRecord, ClientError> {
            self.message_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatRecord {
                id: uuid::Uuid::new_v4().to_string(),
                sender: peer_id.clone(),
                content: content.to_string(),
                timestamp: Utc::now(),
            })
        }

        async fn list_rooms(&self) -> Result<RoomDirectoryListing, ClientError> {
            Ok(RoomDirectoryListing::new())
        }

        async fn room_info(&self, _room_id: &RoomId) -> Result<RoomView, ClientError> {
            Ok(self.room.clone())
        }
    }
}
