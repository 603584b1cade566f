//! `RoomActor` - per-room actor that owns all state of one room.
//!
//! Each `RoomActor`:
//! - Owns membership, moderation flags and the bounded chat history
//! - Processes every mutation for its room one message at a time
//! - Publishes a [`RoomSummary`] after each mutation for lock-free listing
//! - Closes itself when the last member leaves, then reports to the registry
//!
//! # Closing
//!
//! Closing cancels the room's token before anything else, so a handle that
//! is still in someone's hands fails with `NotFound` from that point on.
//! Messages already queued behind the closing one are dropped with the
//! mailbox, which their callers also observe as `NotFound`.

use crate::errors::RoomError;

use super::messages::{
    ActionRequest, ChatEntry, JoinOutcome, LeaveOutcome, MemberInfo, ModerationSnapshot,
    RegistryMessage, RoomAction, RoomMessage, RoomSnapshot, RoomSummary, UserState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretDigest, SecretString};
use common::types::{AdminAction, PeerId, RoomId, SessionId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How often an idle, never-joined room checks its TTL.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the registry to acknowledge a closure.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted chat line, in characters.
pub const MAX_CHAT_LENGTH: usize = 4096;

/// Per-room settings taken from the service configuration.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub history_capacity: usize,
    pub empty_room_ttl: Duration,
    pub mailbox_capacity: usize,
    pub require_secret_when_unlocked: bool,
}

impl From<&crate::config::Config> for RoomSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            history_capacity: config.history_capacity,
            empty_room_ttl: config.empty_room_ttl,
            mailbox_capacity: config.room_mailbox_capacity,
            require_secret_when_unlocked: config.require_secret_when_unlocked,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from(&crate::config::Config::default())
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
    generation: u64,
    summary: watch::Receiver<RoomSummary>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Registry-assigned generation; distinguishes re-created rooms.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Latest published summary. Never blocks the room actor.
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        self.summary.borrow().clone()
    }

    /// Check a secret without joining.
    pub async fn verify(&self, secret: SecretString) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::Verify { secret, respond_to })
            .await?
    }

    /// Verify the secret and add a member in one step.
    pub async fn join(
        &self,
        peer_id: PeerId,
        session_id: SessionId,
        secret: SecretString,
    ) -> Result<JoinOutcome, RoomError> {
        self.request(|respond_to| RoomMessage::Join {
            peer_id,
            session_id,
            secret,
            respond_to,
        })
        .await?
    }

    /// Remove a member; closes the room when it was the last one.
    pub async fn leave(&self, peer_id: PeerId) -> Result<LeaveOutcome, RoomError> {
        self.request(|respond_to| RoomMessage::Leave {
            peer_id,
            respond_to,
        })
        .await?
    }

    /// Apply a moderation or screen share action.
    pub async fn apply_action(&self, request: ActionRequest) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::Action {
            request,
            respond_to,
        })
        .await?
    }

    /// Append a chat line to the room history.
    pub async fn add_message(
        &self,
        peer_id: PeerId,
        content: String,
    ) -> Result<ChatEntry, RoomError> {
        self.request(|respond_to| RoomMessage::AddMessage {
            peer_id,
            content,
            respond_to,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::GetSnapshot { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// True once the room closed or was cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        if self.is_closed() {
            return Err(RoomError::room_not_found());
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::room_not_found())?;

        // A dropped responder means the room closed before reaching us.
        rx.await.map_err(|_| RoomError::room_not_found())
    }
}

#[derive(Debug)]
struct Member {
    session_id: SessionId,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    generation: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Used only to report closure; weak so rooms never keep the registry alive.
    registry: mpsc::WeakSender<RegistryMessage>,
    secret: SecretDigest,
    creator_peer_id: PeerId,
    members: HashMap<PeerId, Member>,
    muted_peers: HashSet<PeerId>,
    /// Sessions that left while muted; the mute is re-applied when they return.
    muted_sessions: HashSet<SessionId>,
    banned_sessions: HashSet<SessionId>,
    is_locked: bool,
    screen_sharer: Option<PeerId>,
    history: VecDeque<ChatEntry>,
    settings: RoomSettings,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_activity_at: Instant,
    summary_tx: watch::Sender<RoomSummary>,
    closed: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        room_id: RoomId,
        generation: u64,
        creator_peer_id: PeerId,
        secret: SecretDigest,
        created_at: DateTime<Utc>,
        settings: RoomSettings,
        registry: mpsc::WeakSender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.mailbox_capacity);
        let initial = RoomSnapshot::empty(room_id.clone(), creator_peer_id.clone(), created_at);
        let (summary_tx, summary_rx) = watch::channel(RoomSummary::from(&initial));

        let actor = Self {
            room_id: room_id.clone(),
            generation,
            receiver,
            cancel_token: cancel_token.clone(),
            registry,
            secret,
            creator_peer_id,
            members: HashMap::new(),
            muted_peers: HashSet::new(),
            muted_sessions: HashSet::new(),
            banned_sessions: HashSet::new(),
            is_locked: false,
            screen_sharer: None,
            history: VecDeque::with_capacity(settings.history_capacity),
            settings,
            created_at,
            last_activity: created_at,
            last_activity_at: Instant::now(),
            summary_tx,
            closed: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            generation,
            summary: summary_rx,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rs.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        debug!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            generation = self.generation,
            "RoomActor started"
        );

        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
        idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rs.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                _ = idle_check.tick() => {
                    if self.idle_expired() {
                        info!(
                            target: "rs.actor.room",
                            room_id = %self.room_id,
                            "Reaping room that was never joined"
                        );
                        self.close().await;
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                            if self.closed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        if !self.closed && !self.members.is_empty() {
            self.metrics.members_left(self.members.len());
        }

        debug!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            members = self.members.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Verify { secret, respond_to } => {
                let result = self.check_secret(&secret).map(|()| self.snapshot());
                let _ = respond_to.send(result);
            }

            RoomMessage::Join {
                peer_id,
                session_id,
                secret,
                respond_to,
            } => {
                let result = self.handle_join(peer_id, session_id, &secret);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                peer_id,
                respond_to,
            } => {
                let result = self.handle_leave(&peer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Action {
                request,
                respond_to,
            } => {
                let result = self.handle_action(request).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::AddMessage {
                peer_id,
                content,
                respond_to,
            } => {
                let result = self.handle_add_message(peer_id, content);
                let _ = respond_to.send(result);
            }

            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    /// Secret check. Unlocked rooms skip it only when configured to.
    fn check_secret(&self, candidate: &SecretString) -> Result<(), RoomError> {
        if !self.is_locked && !self.settings.require_secret_when_unlocked {
            return Ok(());
        }
        if self.secret.matches(candidate.expose_secret()) {
            Ok(())
        } else {
            Err(RoomError::Unauthorized("Invalid secret".to_string()))
        }
    }

    fn handle_join(
        &mut self,
        peer_id: PeerId,
        session_id: SessionId,
        secret: &SecretString,
    ) -> Result<JoinOutcome, RoomError> {
        self.check_secret(secret)?;

        if self.banned_sessions.contains(&session_id) {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Banned session attempted to join"
            );
            return Err(RoomError::Forbidden(
                "Session is banned from this room".to_string(),
            ));
        }

        if self.is_locked && peer_id != self.creator_peer_id {
            return Err(RoomError::Locked);
        }

        // A session reconnecting under a new peer id replaces its old entry.
        let stale: Vec<PeerId> = self
            .members
            .iter()
            .filter(|(id, member)| member.session_id == session_id && **id != peer_id)
            .map(|(id, _)| id.clone())
            .collect();
        for old_peer in stale {
            debug!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                old_peer_id = %old_peer,
                new_peer_id = %peer_id,
                "Replacing stale peer for reconnecting session"
            );
            self.remove_member(&old_peer);
        }

        if self.muted_sessions.remove(&session_id) {
            self.muted_peers.insert(peer_id.clone());
        }

        let is_new = self
            .members
            .insert(
                peer_id.clone(),
                Member {
                    session_id: session_id.clone(),
                },
            )
            .is_none();
        if is_new {
            self.metrics.member_joined();
        }
        self.touch();

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            members = self.members.len(),
            "Member joined"
        );

        let mut roster: Vec<MemberInfo> = self
            .members
            .keys()
            .filter(|id| **id != peer_id)
            .map(|id| MemberInfo {
                peer_id: id.clone(),
                is_admin: *id == self.creator_peer_id,
                is_muted: self.muted_peers.contains(id),
            })
            .collect();
        roster.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        let room = self.snapshot();
        Ok(JoinOutcome {
            roster,
            user_state: UserState {
                is_admin: peer_id == self.creator_peer_id,
                is_muted: self.muted_peers.contains(&peer_id),
            },
            history: self.history.iter().cloned().collect(),
            moderation: room.moderation.clone(),
            room,
        })
    }

    async fn handle_leave(&mut self, peer_id: &PeerId) -> Result<LeaveOutcome, RoomError> {
        if !self.members.contains_key(peer_id) {
            return Err(RoomError::NotFound("Peer not in room".to_string()));
        }

        self.remove_member(peer_id);
        self.touch();

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            remaining = self.members.len(),
            "Member left"
        );

        let room_closed = self.members.is_empty();
        if room_closed {
            self.close().await;
        }

        Ok(LeaveOutcome {
            remaining: self.members.len(),
            room_closed,
        })
    }

    #[instrument(skip_all, fields(room_id = %self.room_id, action = request.action.as_str()))]
    async fn handle_action(&mut self, request: ActionRequest) -> Result<RoomSnapshot, RoomError> {
        let had_members = !self.members.is_empty();

        match request.action.as_admin() {
            Some(admin) => self.apply_admin_action(admin, &request)?,
            None => self.apply_screen_share(&request)?,
        }
        self.touch();

        let snapshot = self.snapshot();
        if had_members && self.members.is_empty() {
            self.close().await;
        }
        Ok(snapshot)
    }

    fn apply_admin_action(
        &mut self,
        action: AdminAction,
        request: &ActionRequest,
    ) -> Result<(), RoomError> {
        if request.acting_peer_id != self.creator_peer_id {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                action = action.as_str(),
                "Non-creator attempted admin action"
            );
            return Err(RoomError::Unauthorized(
                "Only the room creator can perform this action".to_string(),
            ));
        }
        self.check_secret(&request.secret)?;

        let target = if action.targets_peer() {
            let target = request
                .target_peer_id
                .clone()
                .ok_or_else(|| RoomError::BadRequest("targetPeerId is required".to_string()))?;
            if !self.members.contains_key(&target) {
                return Err(RoomError::NotFound("Target peer not in room".to_string()));
            }
            Some(target)
        } else {
            None
        };

        match (action, target) {
            (AdminAction::Lock, _) => self.is_locked = true,
            (AdminAction::Unlock, _) => self.is_locked = false,
            (AdminAction::Mute, Some(target)) => {
                self.muted_peers.insert(target);
            }
            (AdminAction::Unmute, Some(target)) => {
                self.muted_peers.remove(&target);
            }
            (AdminAction::Kick, Some(target)) => {
                if target == self.creator_peer_id {
                    return Err(RoomError::Forbidden(
                        "The room creator cannot be kicked".to_string(),
                    ));
                }
                if let Some(member) = self.remove_member(&target) {
                    let banned = request.target_session_id.clone().unwrap_or(member.session_id);
                    self.banned_sessions.insert(banned);
                }
            }
            (AdminAction::Mute | AdminAction::Unmute | AdminAction::Kick, None) => {
                return Err(RoomError::BadRequest("targetPeerId is required".to_string()));
            }
        }

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            action = action.as_str(),
            target_peer_id = ?request.target_peer_id.as_ref().map(PeerId::as_str),
            "Admin action applied"
        );
        Ok(())
    }

    fn apply_screen_share(&mut self, request: &ActionRequest) -> Result<(), RoomError> {
        if !self.members.contains_key(&request.acting_peer_id) {
            return Err(RoomError::NotFound("Peer not in room".to_string()));
        }
        self.check_secret(&request.secret)?;

        match request.action {
            RoomAction::StartScreenShare => match &self.screen_sharer {
                Some(current) if *current != request.acting_peer_id => {
                    return Err(RoomError::Conflict("Someone is already sharing".to_string()));
                }
                _ => self.screen_sharer = Some(request.acting_peer_id.clone()),
            },
            RoomAction::StopScreenShare => {
                if self.screen_sharer.as_ref() == Some(&request.acting_peer_id) {
                    self.screen_sharer = None;
                }
            }
            other => {
                return Err(RoomError::BadRequest(format!(
                    "Unsupported action: {}",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }

    fn handle_add_message(
        &mut self,
        peer_id: PeerId,
        content: String,
    ) -> Result<ChatEntry, RoomError> {
        if !self.members.contains_key(&peer_id) {
            return Err(RoomError::NotFound("Peer not in room".to_string()));
        }
        if content.trim().is_empty() {
            return Err(RoomError::BadRequest("Message content is empty".to_string()));
        }
        if content.chars().count() > MAX_CHAT_LENGTH {
            return Err(RoomError::BadRequest(format!(
                "Message exceeds {MAX_CHAT_LENGTH} characters"
            )));
        }

        let entry = ChatEntry {
            id: uuid::Uuid::new_v4().to_string(),
            sender: peer_id,
            content,
            timestamp: Utc::now(),
        };

        self.history.push_back(entry.clone());
        while self.history.len() > self.settings.history_capacity {
            self.history.pop_front();
        }
        self.touch();
        Ok(entry)
    }

    /// Drop a member and any per-member moderation state that names it.
    fn remove_member(&mut self, peer_id: &PeerId) -> Option<Member> {
        let member = self.members.remove(peer_id)?;
        if self.screen_sharer.as_ref() == Some(peer_id) {
            self.screen_sharer = None;
        }
        if self.muted_peers.remove(peer_id) {
            self.muted_sessions.insert(member.session_id.clone());
        }
        self.metrics.members_left(1);
        Some(member)
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_activity_at = Instant::now();
        self.summary_tx.send_replace(RoomSummary::from(&self.snapshot()));
    }

    fn idle_expired(&self) -> bool {
        self.members.is_empty() && self.last_activity_at.elapsed() >= self.settings.empty_room_ttl
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut peers: Vec<PeerId> = self.members.keys().cloned().collect();
        peers.sort();
        let mut muted_peers: Vec<PeerId> = self.muted_peers.iter().cloned().collect();
        muted_peers.sort();

        RoomSnapshot {
            room_id: self.room_id.clone(),
            creator_peer_id: self.creator_peer_id.clone(),
            peer_count: peers.len(),
            peers,
            created_at: self.created_at,
            last_activity: self.last_activity,
            moderation: ModerationSnapshot {
                muted_peers,
                is_locked: self.is_locked,
                screen_sharer: self.screen_sharer.clone(),
                banned_count: self.banned_sessions.len(),
            },
        }
    }

    /// Stop accepting work and wait for the registry to drop this room.
    async fn close(&mut self) {
        self.closed = true;
        self.cancel_token.cancel();

        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let (tx, rx) = oneshot::channel();
        let notify = RegistryMessage::RoomClosed {
            room_id: self.room_id.clone(),
            generation: self.generation,
            respond_to: tx,
        };
        if registry.send(notify).await.is_err() {
            return;
        }
        if tokio::time::timeout(CLOSE_ACK_TIMEOUT, rx).await.is_err() {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                "Registry did not acknowledge room closure in time"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn spawn_room(settings: RoomSettings) -> (RoomActorHandle, JoinHandle<()>) {
        let digest = SecretDigest::new(&SecretString::from("abcd")).unwrap();
        // No registry: closure is still observable through the handle.
        let (registry_tx, _registry_rx) = mpsc::channel::<RegistryMessage>(1);
        let weak = registry_tx.downgrade();
        drop(registry_tx);
        RoomActor::spawn(
            RoomId::from("r1"),
            1,
            PeerId::from("A"),
            digest,
            Utc::now(),
            settings,
            weak,
            CancellationToken::new(),
            ActorMetrics::new(),
        )
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    fn admin(action: RoomAction, actor: &str, target: Option<&str>) -> ActionRequest {
        ActionRequest {
            action,
            acting_peer_id: PeerId::from(actor),
            target_peer_id: target.map(PeerId::from),
            target_session_id: None,
            secret: secret("abcd"),
        }
    }

    #[tokio::test]
    async fn test_join_returns_roster_without_self() {
        let (room, _task) = spawn_room(RoomSettings::default());

        let a = room
            .join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        assert!(a.roster.is_empty());
        assert!(a.user_state.is_admin);

        let b = room
            .join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();
        assert_eq!(b.roster.len(), 1);
        assert_eq!(b.roster[0].peer_id, PeerId::from("A"));
        assert!(b.roster[0].is_admin);
        assert!(!b.user_state.is_admin);
        assert_eq!(b.room.peer_count, 2);

        room.cancel();
    }

    #[tokio::test]
    async fn test_wrong_secret_is_unauthorized_and_leaves_no_member() {
        let (room, _task) = spawn_room(RoomSettings::default());

        let result = room
            .join(PeerId::from("B"), SessionId::from("sB"), secret("nope"))
            .await;
        assert!(matches!(result, Err(RoomError::Unauthorized(_))));
        assert_eq!(room.snapshot().await.unwrap().peer_count, 0);

        room.cancel();
    }

    #[tokio::test]
    async fn test_unlocked_room_accepts_any_secret_when_configured() {
        let settings = RoomSettings {
            require_secret_when_unlocked: false,
            ..RoomSettings::default()
        };
        let (room, _task) = spawn_room(settings);

        assert!(room.verify(secret("whatever")).await.is_ok());

        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.apply_action(admin(RoomAction::Lock, "A", None))
            .await
            .unwrap();

        // Locked rooms always compare.
        let result = room.verify(secret("whatever")).await;
        assert!(matches!(result, Err(RoomError::Unauthorized(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_locked_room_admits_only_creator() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.apply_action(admin(RoomAction::Lock, "A", None))
            .await
            .unwrap();
        // Idempotent.
        let snapshot = room
            .apply_action(admin(RoomAction::Lock, "A", None))
            .await
            .unwrap();
        assert!(snapshot.moderation.is_locked);

        let result = room
            .join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await;
        assert_eq!(result.unwrap_err(), RoomError::Locked);

        let creator_again = room
            .join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await;
        assert!(creator_again.is_ok());

        room.cancel();
    }

    #[tokio::test]
    async fn test_non_creator_actions_are_unauthorized_and_change_nothing() {
        let (room, _task) = spawn_room(RoomSettings::default());
        for (peer, session) in [("A", "sA"), ("B", "sB"), ("C", "sC")] {
            room.join(PeerId::from(peer), SessionId::from(session), secret("abcd"))
                .await
                .unwrap();
        }
        let before = room.snapshot().await.unwrap();

        let (mute, unmute) = tokio::join!(
            room.apply_action(admin(RoomAction::Mute, "B", Some("C"))),
            room.apply_action(admin(RoomAction::Unmute, "C", Some("B"))),
        );
        assert!(matches!(mute, Err(RoomError::Unauthorized(_))));
        assert!(matches!(unmute, Err(RoomError::Unauthorized(_))));

        let after = room.snapshot().await.unwrap();
        assert_eq!(before.moderation, after.moderation);
        assert_eq!(before.peers, after.peers);

        room.cancel();
    }

    #[tokio::test]
    async fn test_kick_bans_session_not_peer() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();

        let mut kick = admin(RoomAction::Kick, "A", Some("B"));
        kick.target_session_id = Some(SessionId::from("sB"));
        let snapshot = room.apply_action(kick).await.unwrap();
        assert_eq!(snapshot.peers, vec![PeerId::from("A")]);
        assert_eq!(snapshot.moderation.banned_count, 1);

        let again = room
            .join(PeerId::from("B2"), SessionId::from("sB"), secret("abcd"))
            .await;
        assert!(matches!(again, Err(RoomError::Forbidden(_))));

        let fresh = room
            .join(PeerId::from("B3"), SessionId::from("sB-new"), secret("abcd"))
            .await;
        assert!(fresh.is_ok());

        room.cancel();
    }

    #[tokio::test]
    async fn test_kick_without_session_bans_recorded_session() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();

        room.apply_action(admin(RoomAction::Kick, "A", Some("B")))
            .await
            .unwrap();
        let again = room
            .join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await;
        assert!(matches!(again, Err(RoomError::Forbidden(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_creator_cannot_kick_self() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        let result = room
            .apply_action(admin(RoomAction::Kick, "A", Some("A")))
            .await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));
        assert_eq!(room.snapshot().await.unwrap().peer_count, 1);

        // Muting self is permitted.
        let muted = room
            .apply_action(admin(RoomAction::Mute, "A", Some("A")))
            .await
            .unwrap();
        assert_eq!(muted.moderation.muted_peers, vec![PeerId::from("A")]);

        room.cancel();
    }

    #[tokio::test]
    async fn test_mute_requires_member_target() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        let missing = room
            .apply_action(admin(RoomAction::Mute, "A", Some("ghost")))
            .await;
        assert!(matches!(missing, Err(RoomError::NotFound(_))));

        let no_target = room.apply_action(admin(RoomAction::Mute, "A", None)).await;
        assert!(matches!(no_target, Err(RoomError::BadRequest(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_mute_survives_rejoin_under_same_session() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();
        room.apply_action(admin(RoomAction::Mute, "A", Some("B")))
            .await
            .unwrap();

        room.leave(PeerId::from("B")).await.unwrap();
        let rejoined = room
            .join(PeerId::from("B2"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();
        assert!(rejoined.user_state.is_muted);

        room.cancel();
    }

    #[tokio::test]
    async fn test_reconnecting_session_replaces_stale_peer() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();

        let outcome = room
            .join(PeerId::from("B-new"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();
        assert_eq!(outcome.room.peers, vec![PeerId::from("A"), PeerId::from("B-new")]);

        room.cancel();
    }

    #[tokio::test]
    async fn test_history_is_bounded_fifo() {
        let settings = RoomSettings {
            history_capacity: 100,
            ..RoomSettings::default()
        };
        let (room, _task) = spawn_room(settings);
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        for i in 0..101 {
            room.add_message(PeerId::from("A"), format!("msg-{i}"))
                .await
                .unwrap();
        }

        let outcome = room
            .join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();
        assert_eq!(outcome.history.len(), 100);
        assert_eq!(outcome.history[0].content, "msg-1");
        assert_eq!(outcome.history[99].content, "msg-100");

        room.cancel();
    }

    #[tokio::test]
    async fn test_add_message_rejects_non_member_and_empty() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        let stranger = room.add_message(PeerId::from("Z"), "hi".to_string()).await;
        assert!(matches!(stranger, Err(RoomError::NotFound(_))));

        let blank = room.add_message(PeerId::from("A"), "   ".to_string()).await;
        assert!(matches!(blank, Err(RoomError::BadRequest(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_screen_share_is_exclusive() {
        let (room, _task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.join(PeerId::from("B"), SessionId::from("sB"), secret("abcd"))
            .await
            .unwrap();

        room.apply_action(admin(RoomAction::StartScreenShare, "B", None))
            .await
            .unwrap();
        let conflict = room
            .apply_action(admin(RoomAction::StartScreenShare, "A", None))
            .await;
        assert!(matches!(conflict, Err(RoomError::Conflict(_))));

        // Leaving clears the sharer.
        room.leave(PeerId::from("B")).await.unwrap();
        let snapshot = room
            .apply_action(admin(RoomAction::StartScreenShare, "A", None))
            .await
            .unwrap();
        assert_eq!(snapshot.moderation.screen_sharer, Some(PeerId::from("A")));

        room.cancel();
    }

    #[tokio::test]
    async fn test_last_leave_closes_room() {
        let (room, task) = spawn_room(RoomSettings::default());
        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();

        let outcome = room.leave(PeerId::from("A")).await.unwrap();
        assert_eq!(outcome.remaining, 0);
        assert!(outcome.room_closed);
        assert!(room.is_closed());

        let after = room.snapshot().await;
        assert!(matches!(after, Err(RoomError::NotFound(_))));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_leave_unknown_peer_is_not_found() {
        let (room, _task) = spawn_room(RoomSettings::default());
        let result = room.leave(PeerId::from("ghost")).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));
        assert!(!room.is_closed());
        room.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_joined_room_is_reaped_after_ttl() {
        let settings = RoomSettings {
            empty_room_ttl: Duration::from_secs(30),
            ..RoomSettings::default()
        };
        let (room, task) = spawn_room(settings);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!room.is_closed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert!(room.is_closed());
    }

    #[tokio::test]
    async fn test_summary_tracks_mutations() {
        let (room, _task) = spawn_room(RoomSettings::default());
        assert_eq!(room.summary().peer_count, 0);

        room.join(PeerId::from("A"), SessionId::from("sA"), secret("abcd"))
            .await
            .unwrap();
        room.apply_action(admin(RoomAction::Lock, "A", None))
            .await
            .unwrap();

        let summary = room.summary();
        assert_eq!(summary.peer_count, 1);
        assert!(summary.is_locked);

        room.cancel();
    }
}
