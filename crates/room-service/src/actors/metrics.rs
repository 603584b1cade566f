//! Actor counters and mailbox backlog sampling.
//!
//! Backlog thresholds, in queued messages:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | <= 200 | 201-800 | > 800    |
//! | Room       | <= 50  | 51-200  | > 200    |

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the registry actor.
pub const REGISTRY_MAILBOX_NORMAL: usize = 200;
pub const REGISTRY_MAILBOX_WARNING: usize = 800;

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 50;
pub const ROOM_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// RegistryActor (singleton).
    Registry,
    /// RoomActor (one per room).
    Room,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_WARNING,
            ActorType::Room => ROOM_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_NORMAL,
            ActorType::Room => ROOM_MAILBOX_NORMAL,
        }
    }
}

/// Backlog level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Samples the backlog of one actor mailbox.
///
/// The actor calls [`MailboxMonitor::record_received`] with the number of
/// messages still queued each time it takes one, so the reading is the real
/// queue length rather than an estimate kept by senders.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room id, or "registry".
    actor_id: String,
    backlog: AtomicUsize,
    peak_backlog: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            backlog: AtomicUsize::new(0),
            peak_backlog: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record one message taken off the mailbox with `backlog` still queued.
    pub fn record_received(&self, backlog: usize) {
        let previous = self.backlog.swap(backlog, Ordering::Relaxed);
        self.peak_backlog.fetch_max(backlog, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        // Per-room series would be unbounded cardinality; only the registry is exported.
        if self.actor_type == ActorType::Registry {
            prom::set_mailbox_depth(self.actor_type.as_str(), backlog);
        }

        let level = self.level_for(backlog);
        if level == self.level_for(previous) {
            return;
        }
        match level {
            MailboxLevel::Critical => warn!(
                target: "rs.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox backlog critical"
            ),
            MailboxLevel::Warning => debug!(
                target: "rs.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog,
                "Mailbox backlog elevated"
            ),
            MailboxLevel::Normal => debug!(
                target: "rs.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                "Mailbox backlog drained"
            ),
        }
    }

    /// Backlog seen at the last sample.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_backlog(&self) -> usize {
        self.peak_backlog.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        self.level_for(self.backlog())
    }

    fn level_for(&self, backlog: usize) -> MailboxLevel {
        if backlog > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if backlog > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system, shared by all actors.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_rooms: AtomicUsize,
    pub active_members: AtomicUsize,
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let rooms = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(rooms);
    }

    pub fn room_removed(&self) {
        let rooms = self
            .active_rooms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .map_or(0, |prev| prev.saturating_sub(1));
        prom::set_rooms_active(rooms);
    }

    pub fn member_joined(&self) {
        let members = self.active_members.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_members_active(members);
    }

    pub fn members_left(&self, count: usize) {
        let members = self
            .active_members
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(count)))
            .map_or(0, |prev| prev.saturating_sub(count));
        prom::set_members_active(members);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.active_members.load(Ordering::Relaxed)
    }
}
