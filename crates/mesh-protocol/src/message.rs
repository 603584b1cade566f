//! Application messages exchanged over a pairwise channel.
//!
//! Wire shape (one JSON object per frame):
//!
//! ```text
//! {"type":"media_state_change","sender":"peer-a","timestamp":1700000000000,
//!  "kind":"audio","enabled":false}
//! ```
//!
//! `type`, `sender` and `timestamp` are present on every message; the
//! remaining fields depend on `type`.

use crate::transfer::{FileDescriptor, FileId};
use bytes::Bytes;
use chrono::Utc;
use common::types::{AdminAction, PeerId, SessionId};
use serde::{Deserialize, Serialize};

/// Which outgoing media track a `media_state_change` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Closed set of message kinds a peer may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MeshMessage {
    /// Free-form chat line.
    Chat { content: String },

    /// Sender toggled one of its outgoing tracks.
    MediaStateChange { kind: MediaKind, enabled: bool },

    /// Mirror of a moderation action already applied by the registry.
    AdminAction {
        action: AdminAction,
        target_peer_id: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_session_id: Option<SessionId>,
    },

    /// Announces an upcoming file; chunks follow on the same channel.
    FileMetadata {
        file_id: FileId,
        file_name: String,
        mime_type: String,
        file_size: u64,
        total_chunks: u32,
    },

    /// One slice of a file announced by `file_metadata`.
    FileChunk {
        file_id: FileId,
        chunk_index: u32,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },

    /// Sender is about to disconnect.
    PeerLeaving,

    /// Sender started recording the session.
    RecordingStarted,

    /// Sender stopped recording the session.
    RecordingStopped,
}

impl MeshMessage {
    /// The `type` tag as it appears on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::MediaStateChange { .. } => "media_state_change",
            Self::AdminAction { .. } => "admin_action",
            Self::FileMetadata { .. } => "file_metadata",
            Self::FileChunk { .. } => "file_chunk",
            Self::PeerLeaving => "peer_leaving",
            Self::RecordingStarted => "recording_started",
            Self::RecordingStopped => "recording_stopped",
        }
    }

    /// Build the `file_metadata` announcement for a descriptor.
    #[must_use]
    pub fn file_metadata(descriptor: &FileDescriptor) -> Self {
        Self::FileMetadata {
            file_id: descriptor.file_id.clone(),
            file_name: descriptor.file_name.clone(),
            mime_type: descriptor.mime_type.clone(),
            file_size: descriptor.file_size,
            total_chunks: descriptor.total_chunks,
        }
    }
}

/// A message plus the fields every message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerId,
    /// Milliseconds since the Unix epoch, sender clock.
    pub timestamp: i64,
    #[serde(flatten)]
    pub message: MeshMessage,
}

impl Envelope {
    /// Stamp `message` with the sender and the current time.
    #[must_use]
    pub fn new(sender: PeerId, message: MeshMessage) -> Self {
        Self {
            sender,
            timestamp: Utc::now().timestamp_millis(),
            message,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_envelope_fields_are_flat() {
        let envelope = Envelope {
            sender: PeerId::from("A"),
            timestamp: 42,
            message: MeshMessage::MediaStateChange {
                kind: MediaKind::Audio,
                enabled: false,
            },
        };

        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "media_state_change",
                "sender": "A",
                "timestamp": 42,
                "kind": "audio",
                "enabled": false
            })
        );
    }

    #[test]
    fn test_admin_action_uses_camel_case_fields() {
        let raw = json!({
            "type": "admin_action",
            "sender": "A",
            "timestamp": 1,
            "action": "kick",
            "targetPeerId": "B",
            "targetSessionId": "sB"
        });

        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(
            envelope.message,
            MeshMessage::AdminAction {
                action: AdminAction::Kick,
                target_peer_id: PeerId::from("B"),
                target_session_id: Some(SessionId::from("sB")),
            }
        );
    }

    #[test]
    fn test_file_chunk_data_is_base64() {
        let envelope = Envelope {
            sender: PeerId::from("A"),
            timestamp: 7,
            message: MeshMessage::FileChunk {
                file_id: FileId::from("7-a.txt"),
                chunk_index: 3,
                data: Bytes::from_static(b"hello"),
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["data"], "aGVsbG8=");
        assert_eq!(value["chunkIndex"], 3);

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_unit_variants_carry_only_common_fields() {
        let envelope = Envelope {
            sender: PeerId::from("A"),
            timestamp: 9,
            message: MeshMessage::PeerLeaving,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({"type": "peer_leaving", "sender": "A", "timestamp": 9}));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = json!({"type": "self_destruct", "sender": "A", "timestamp": 1});
        assert!(serde_json::from_value::<Envelope>(raw).is_err());
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let message = MeshMessage::RecordingStopped;
        let value = serde_json::to_value(Envelope::new(PeerId::from("A"), message.clone())).unwrap();
        assert_eq!(value["type"], message.kind());
    }
}
