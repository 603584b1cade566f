//! `RoomRegistry` - singleton supervisor for room actors.
//!
//! The registry actor is the top-level actor of the room service:
//!
//! - Maps room ids to live `RoomActor` handles
//! - Creates rooms and removes them when they report closure
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! Room operations do not pass through the registry mailbox. The handle
//! resolves the room once and then talks to the room actor directly, so
//! one busy room never delays another.
//!
//! # Generations
//!
//! Every created room gets a fresh generation number. A closure report only
//! removes the entry whose generation matches, so a room re-created under
//! the same id is never dropped by its predecessor's late report.

use crate::errors::RoomError;
use crate::observability::metrics as prom;

use super::messages::{
    ActionRequest, ChatEntry, JoinOutcome, LeaveOutcome, RegistryMessage, RegistryStatus,
    RoomSnapshot, RoomSummary,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};

use chrono::Utc;
use common::secret::{ExposeSecret, SecretDigest, SecretString};
use common::types::{PeerId, RoomId, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long a removed room task may take to finish before we stop waiting.
const ROOM_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the registry actor.
///
/// This is the public interface used by the HTTP layer. Cloning is cheap.
#[derive(Clone)]
pub struct RoomRegistry {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistry {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(settings: RoomSettings, metrics: Arc<ActorMetrics>, shutdown_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor::new(
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            settings,
            metrics,
            shutdown_timeout,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Spawn a registry configured from the service configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::Config, metrics: Arc<ActorMetrics>) -> Self {
        Self::new(RoomSettings::from(config), metrics, config.shutdown_timeout)
    }

    /// Create a room. Fails with `AlreadyExists` if the id is taken.
    #[instrument(skip_all, name = "rs.registry.create", fields(room_id = %room_id))]
    pub async fn create_room(
        &self,
        room_id: RoomId,
        secret: SecretString,
        creator_peer_id: PeerId,
    ) -> Result<RoomSnapshot, RoomError> {
        observe("create", async {
            require_id(room_id.as_str(), "roomId")?;
            require_id(creator_peer_id.as_str(), "creatorPeerId")?;
            if secret.expose_secret().is_empty() {
                return Err(RoomError::BadRequest("secret is required".to_string()));
            }

            self.request(|respond_to| RegistryMessage::CreateRoom {
                room_id,
                secret,
                creator_peer_id,
                respond_to,
            })
            .await?
        })
        .await
    }

    /// Check a room secret without joining.
    pub async fn verify_room(
        &self,
        room_id: &RoomId,
        secret: SecretString,
    ) -> Result<RoomSnapshot, RoomError> {
        observe("verify", async {
            self.lookup(room_id).await?.verify(secret).await
        })
        .await
    }

    /// Verify the secret and add the peer to the room.
    #[instrument(skip_all, name = "rs.registry.join", fields(room_id = %room_id, peer_id = %peer_id))]
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
        session_id: SessionId,
        secret: SecretString,
    ) -> Result<JoinOutcome, RoomError> {
        observe("join", async {
            require_id(peer_id.as_str(), "peerId")?;
            require_id(session_id.as_str(), "sessionId")?;
            self.lookup(room_id)
                .await?
                .join(peer_id, session_id, secret)
                .await
        })
        .await
    }

    /// Remove the peer from the room. The room is gone once this returns
    /// with `room_closed == true`.
    pub async fn leave_room(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
    ) -> Result<LeaveOutcome, RoomError> {
        observe("leave", async {
            self.lookup(room_id).await?.leave(peer_id).await
        })
        .await
    }

    /// Apply a moderation or screen share action.
    #[instrument(skip_all, name = "rs.registry.action", fields(room_id = %room_id, action = request.action.as_str()))]
    pub async fn apply_action(
        &self,
        room_id: &RoomId,
        request: ActionRequest,
    ) -> Result<RoomSnapshot, RoomError> {
        observe("action", async {
            require_id(request.acting_peer_id.as_str(), "peerId")?;
            self.lookup(room_id).await?.apply_action(request).await
        })
        .await
    }

    /// Append a chat line to the room history.
    pub async fn add_message(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
        content: String,
    ) -> Result<ChatEntry, RoomError> {
        observe("message", async {
            self.lookup(room_id)
                .await?
                .add_message(peer_id, content)
                .await
        })
        .await
    }

    /// Full view of one room.
    pub async fn room_info(&self, room_id: &RoomId) -> Result<RoomSnapshot, RoomError> {
        self.lookup(room_id).await?.snapshot().await
    }

    pub async fn room_exists(&self, room_id: &RoomId) -> bool {
        self.lookup(room_id).await.is_ok()
    }

    /// Summaries of every live room, ordered by room id.
    pub async fn list_rooms(&self) -> Result<Vec<(RoomId, RoomSummary)>, RoomError> {
        self.request(|respond_to| RegistryMessage::ListRooms { respond_to })
            .await
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, RoomError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms and cancel every room actor.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RoomError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn lookup(&self, room_id: &RoomId) -> Result<RoomActorHandle, RoomError> {
        require_id(room_id.as_str(), "roomId")?;
        self.request(|respond_to| RegistryMessage::LookupRoom {
            room_id: room_id.clone(),
            respond_to,
        })
        .await?
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RoomError> {
        if self.is_cancelled() {
            return Err(RoomError::Unavailable);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }
}

fn require_id(value: &str, field: &str) -> Result<(), RoomError> {
    if value.trim().is_empty() {
        Err(RoomError::BadRequest(format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Run a registry operation and record its outcome and latency.
async fn observe<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, RoomError>>,
) -> Result<T, RoomError> {
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.error_code(),
    };
    prom::record_room_operation(operation, status, start.elapsed());
    result
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The registry actor implementation.
struct RegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Handed to rooms so they can report closure.
    self_sender: mpsc::WeakSender<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    next_generation: u64,
    accepting_new: bool,
    settings: RoomSettings,
    shutdown_timeout: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    fn new(
        receiver: mpsc::Receiver<RegistryMessage>,
        self_sender: mpsc::WeakSender<RegistryMessage>,
        cancel_token: CancellationToken,
        settings: RoomSettings,
        metrics: Arc<ActorMetrics>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            cancel_token,
            rooms: HashMap::new(),
            next_generation: 1,
            accepting_new: true,
            settings,
            shutdown_timeout,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        }
    }

    #[instrument(skip_all, name = "rs.actor.registry")]
    async fn run(mut self) {
        info!(target: "rs.registry", "Room registry started");

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rs.registry",
                        "Room registry received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rs.registry",
                                "Room registry channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rs.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "Room registry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                room_id,
                secret,
                creator_peer_id,
                respond_to,
            } => {
                let result = self.create_room(room_id, &secret, creator_peer_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::LookupRoom {
                room_id,
                respond_to,
            } => {
                let result = self.lookup_room(&room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::RoomClosed {
                room_id,
                generation,
                respond_to,
            } => {
                self.room_closed(&room_id, generation);
                let _ = respond_to.send(());
            }

            RegistryMessage::ListRooms { respond_to } => {
                let _ = respond_to.send(self.list_rooms());
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.initiate_shutdown(deadline);
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_room(
        &mut self,
        room_id: RoomId,
        secret: &SecretString,
        creator_peer_id: PeerId,
    ) -> Result<RoomSnapshot, RoomError> {
        if !self.accepting_new {
            return Err(RoomError::Unavailable);
        }

        // A closed room whose report has not arrived yet no longer owns the id.
        match self.rooms.get(&room_id) {
            Some(existing) if !existing.handle.is_closed() => {
                return Err(RoomError::AlreadyExists);
            }
            Some(_) => self.remove_room(&room_id, "superseded"),
            None => {}
        }

        let digest = SecretDigest::new(secret)
            .map_err(|e| RoomError::Internal(format!("secret digest failed: {e}")))?;

        let generation = self.next_generation;
        self.next_generation += 1;
        let created_at = Utc::now();

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            generation,
            creator_peer_id.clone(),
            digest,
            created_at,
            self.settings.clone(),
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle,
                task_handle,
            },
        );
        self.metrics.room_created();

        info!(
            target: "rs.registry",
            room_id = %room_id,
            generation,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(RoomSnapshot::empty(room_id, creator_peer_id, created_at))
    }

    fn lookup_room(&self, room_id: &RoomId) -> Result<RoomActorHandle, RoomError> {
        match self.rooms.get(room_id) {
            Some(managed) if !managed.handle.is_closed() => Ok(managed.handle.clone()),
            _ => Err(RoomError::room_not_found()),
        }
    }

    fn room_closed(&mut self, room_id: &RoomId, generation: u64) {
        let matches = self
            .rooms
            .get(room_id)
            .is_some_and(|managed| managed.handle.generation() == generation);

        if matches {
            self.remove_room(room_id, "closed");
        } else {
            debug!(
                target: "rs.registry",
                room_id = %room_id,
                generation,
                "Ignoring closure report from stale room generation"
            );
        }
    }

    /// Drop a room entry and reap its task in the background.
    fn remove_room(&mut self, room_id: &RoomId, reason: &'static str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };
        managed.handle.cancel();
        self.metrics.room_removed();

        let room_id_owned = room_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_CLEANUP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rs.registry",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rs.registry",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rs.registry",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "rs.registry",
            room_id = %room_id,
            reason,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
    }

    fn list_rooms(&self) -> Vec<(RoomId, RoomSummary)> {
        let mut rooms: Vec<(RoomId, RoomSummary)> = self
            .rooms
            .iter()
            .filter(|(_, managed)| !managed.handle.is_closed())
            .map(|(id, managed)| (id.clone(), managed.handle.summary()))
            .collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.backlog(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "rs.registry",
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_timeout = deadline;
        self.cancel_token.cancel();
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        // Rooms closing right now wait for an acknowledgement; refuse further
        // reports and drop queued requests so nobody waits on us.
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(self.shutdown_timeout, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rs.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rs.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rs.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(target: "rs.registry", "Graceful shutdown complete");
    }

    /// Remove rooms whose task ended without reporting closure.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            managed.handle.cancel();

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "rs.registry",
                        room_id = %room_id,
                        "Room actor exited before reporting closure"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rs.registry",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::RoomAction;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(
            RoomSettings::default(),
            ActorMetrics::new(),
            Duration::from_secs(5),
        )
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[tokio::test]
    async fn test_create_then_duplicate_is_rejected() {
        let registry = registry();
        let room = RoomId::from("r1");

        let created = registry
            .create_room(room.clone(), secret("abcd"), PeerId::from("A"))
            .await
            .unwrap();
        assert_eq!(created.peer_count, 0);
        assert_eq!(created.creator_peer_id, PeerId::from("A"));

        let duplicate = registry
            .create_room(room, secret("other"), PeerId::from("B"))
            .await;
        assert_eq!(duplicate.unwrap_err(), RoomError::AlreadyExists);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_empty_ids_are_bad_requests() {
        let registry = registry();

        let result = registry
            .create_room(RoomId::from(""), secret("abcd"), PeerId::from("A"))
            .await;
        assert!(matches!(result, Err(RoomError::BadRequest(_))));

        let result = registry
            .create_room(RoomId::from("r1"), secret(""), PeerId::from("A"))
            .await;
        assert!(matches!(result, Err(RoomError::BadRequest(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let registry = registry();
        let room = RoomId::from("missing");

        let verify = registry.verify_room(&room, secret("abcd")).await;
        assert!(matches!(verify, Err(RoomError::NotFound(_))));

        let join = registry
            .join_room(&room, PeerId::from("A"), SessionId::from("s"), secret("abcd"))
            .await;
        assert!(matches!(join, Err(RoomError::NotFound(_))));
        assert!(!registry.room_exists(&room).await);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_last_leave_removes_room_before_returning() {
        let registry = registry();
        let room = RoomId::from("r1");

        registry
            .create_room(room.clone(), secret("abcd"), PeerId::from("A"))
            .await
            .unwrap();
        registry
            .join_room(&room, PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        let outcome = registry.leave_room(&room, PeerId::from("A")).await.unwrap();
        assert!(outcome.room_closed);

        assert!(!registry.room_exists(&room).await);
        assert!(registry.list_rooms().await.unwrap().is_empty());

        // The id is free again.
        let recreated = registry
            .create_room(room, secret("new"), PeerId::from("B"))
            .await;
        assert!(recreated.is_ok());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_kick_of_last_other_member_keeps_room_with_creator() {
        let registry = registry();
        let room = RoomId::from("r1");

        registry
            .create_room(room.clone(), secret("abcd"), PeerId::from("A"))
            .await
            .unwrap();
        for (peer, session) in [("A", "sA"), ("B", "sB")] {
            registry
                .join_room(&room, PeerId::from(peer), SessionId::from(session), secret("abcd"))
                .await
                .unwrap();
        }

        let snapshot = registry
            .apply_action(
                &room,
                ActionRequest {
                    action: RoomAction::Kick,
                    acting_peer_id: PeerId::from("A"),
                    target_peer_id: Some(PeerId::from("B")),
                    target_session_id: None,
                    secret: secret("abcd"),
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.peer_count, 1);
        assert!(registry.room_exists(&room).await);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_list_rooms_is_sorted_and_summarized() {
        let registry = registry();

        for id in ["b-room", "a-room"] {
            registry
                .create_room(RoomId::from(id), secret("abcd"), PeerId::from("A"))
                .await
                .unwrap();
        }
        registry
            .join_room(
                &RoomId::from("b-room"),
                PeerId::from("A"),
                SessionId::from("sA"),
                secret("abcd"),
            )
            .await
            .unwrap();

        let rooms = registry.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].0, RoomId::from("a-room"));
        assert_eq!(rooms[0].1.peer_count, 0);
        assert_eq!(rooms[1].1.peer_count, 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_winner() {
        let registry = registry();
        let room = RoomId::from("race");

        let (a, b) = tokio::join!(
            registry.create_room(room.clone(), secret("one"), PeerId::from("A")),
            registry.create_room(room.clone(), secret("two"), PeerId::from("B")),
        );
        assert!(a.is_ok() ^ b.is_ok());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let registry = registry();
        registry
            .create_room(RoomId::from("r1"), secret("abcd"), PeerId::from("A"))
            .await
            .unwrap();

        registry.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(registry.is_cancelled());

        let result = registry
            .create_room(RoomId::from("r2"), secret("abcd"), PeerId::from("A"))
            .await;
        assert_eq!(result.unwrap_err(), RoomError::Unavailable);
    }

    #[tokio::test]
    async fn test_status_reports_room_count() {
        let registry = registry();
        let status = registry.get_status().await.unwrap();
        assert_eq!(status.room_count, 0);
        assert!(!status.is_draining);

        registry
            .create_room(RoomId::from("r1"), secret("abcd"), PeerId::from("A"))
            .await
            .unwrap();
        assert_eq!(registry.get_status().await.unwrap().room_count, 1);

        registry.cancel();
    }
}
