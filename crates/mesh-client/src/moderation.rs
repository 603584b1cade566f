//! Local side of moderation.
//!
//! The registry is authoritative. What lives here mirrors it so effects are
//! immediate: the persisted list of sessions this client was kicked with, and
//! the outgoing media flags including the admin-imposed mute.

use crate::errors::ClientError;
use common::types::{RoomId, SessionId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Sessions this client was kicked with, per room.
///
/// A join attempt under a listed session fails locally with `Forbidden`
/// before the registry is contacted. With a path configured the list is
/// persisted as JSON and survives restarts.
#[derive(Debug)]
pub struct BanList {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<RoomId, BTreeSet<SessionId>>>,
}

impl BanList {
    /// Empty, unpersisted list.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load the list stored at `path`. A missing file is an empty list.
    pub async fn load(path: PathBuf) -> Result<Self, ClientError> {
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                ClientError::Storage(format!("Corrupt ban list {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "Failed to read ban list {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Load from `path` when given, otherwise start in memory.
    pub async fn open(path: Option<PathBuf>) -> Result<Self, ClientError> {
        match path {
            Some(path) => Self::load(path).await,
            None => Ok(Self::in_memory()),
        }
    }

    pub async fn is_banned(&self, room_id: &RoomId, session_id: &SessionId) -> bool {
        self.entries
            .lock()
            .await
            .get(room_id)
            .is_some_and(|sessions| sessions.contains(session_id))
    }

    /// Record a ban and persist it.
    ///
    /// The in-memory entry is kept even when persisting fails, so the current
    /// process still refuses to rejoin.
    pub async fn ban(&self, room_id: &RoomId, session_id: &SessionId) -> Result<(), ClientError> {
        let mut entries = self.entries.lock().await;
        let inserted = entries
            .entry(room_id.clone())
            .or_default()
            .insert(session_id.clone());
        if !inserted {
            return Ok(());
        }

        info!(
            target: "mesh.moderation",
            room_id = %room_id,
            "Session banned from room"
        );

        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_vec_pretty(&*entries)
            .map_err(|e| ClientError::Storage(format!("Failed to encode ban list: {e}")))?;

        // Still holding the lock, so concurrent bans are written in order.
        tokio::fs::write(path, raw).await.map_err(|e| {
            warn!(
                target: "mesh.moderation",
                path = %path.display(),
                error = %e,
                "Failed to persist ban list"
            );
            ClientError::Storage(format!("Failed to write ban list: {e}"))
        })
    }
}

/// Outgoing media flags of the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// Set while an admin mute is in force.
    pub force_muted: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            force_muted: false,
        }
    }
}

/// Local capture switches. The capture layer subscribes to the watch channel
/// and enables or disables its tracks accordingly.
#[derive(Debug)]
pub struct LocalMedia {
    state: watch::Sender<MediaState>,
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new(MediaState::default())
    }
}

impl LocalMedia {
    #[must_use]
    pub fn new(initial: MediaState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> MediaState {
        *self.state.borrow()
    }

    /// Toggle outgoing audio. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// `Forbidden` when enabling audio while force-muted.
    pub fn set_audio(&self, enabled: bool) -> Result<bool, ClientError> {
        if enabled && self.state().force_muted {
            return Err(ClientError::Forbidden(
                "Muted by the room admin".to_string(),
            ));
        }
        Ok(self.state.send_if_modified(|state| {
            let changed = state.audio_enabled != enabled;
            state.audio_enabled = enabled;
            changed
        }))
    }

    /// Toggle outgoing video. Returns whether the flag changed.
    pub fn set_video(&self, enabled: bool) -> bool {
        self.state.send_if_modified(|state| {
            let changed = state.video_enabled != enabled;
            state.video_enabled = enabled;
            changed
        })
    }

    /// Apply an admin mute: audio off and locked off.
    pub fn force_mute(&self) {
        self.state.send_modify(|state| {
            state.audio_enabled = false;
            state.force_muted = true;
        });
    }

    /// Lift an admin mute. Audio stays off until the participant enables it.
    pub fn release_mute(&self) {
        self.state.send_modify(|state| state.force_muted = false);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("mesh-bans-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_ban_is_scoped_to_room() {
        let bans = BanList::in_memory();
        let room = RoomId::from("r1");
        let session = SessionId::from("sB");

        bans.ban(&room, &session).await.unwrap();

        assert!(bans.is_banned(&room, &session).await);
        assert!(!bans.is_banned(&RoomId::from("r2"), &session).await);
        assert!(!bans.is_banned(&room, &SessionId::from("sC")).await);
    }

    #[tokio::test]
    async fn test_bans_survive_reload() {
        let path = temp_path();
        let bans = BanList::load(path.clone()).await.unwrap();
        bans.ban(&RoomId::from("r1"), &SessionId::from("sB"))
            .await
            .unwrap();

        let reloaded = BanList::load(path.clone()).await.unwrap();
        assert!(
            reloaded
                .is_banned(&RoomId::from("r1"), &SessionId::from("sB"))
                .await
        );

        tokio::fs::remove_file(path).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_ban_list_is_an_error() {
        let path = temp_path();
        tokio::fs::write(&path, b"not json").await.unwrap();

        let result = BanList::load(path.clone()).await;
        assert!(matches!(result, Err(ClientError::Storage(_))));

        tokio::fs::remove_file(path).await.unwrap();
    }

    #[test]
    fn test_force_mute_blocks_unmute() {
        let media = LocalMedia::default();
        media.force_mute();

        assert!(!media.state().audio_enabled);
        assert!(matches!(
            media.set_audio(true),
            Err(ClientError::Forbidden(_))
        ));
        // Muting again is always allowed.
        assert!(!media.set_audio(false).unwrap());

        media.release_mute();
        assert!(media.set_audio(true).unwrap());
        assert!(media.state().audio_enabled);
    }

    #[test]
    fn test_video_toggle_notifies_subscribers() {
        let media = LocalMedia::default();
        let mut rx = media.subscribe();

        assert!(media.set_video(false));
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().video_enabled);

        assert!(!media.set_video(false));
        assert!(!rx.has_changed().unwrap());
    }
}
