//! Events surfaced to the application layer.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::{AdminAction, PeerId, RoomId, SessionId};
use mesh_protocol::transfer::{Direction, FileDescriptor, TransferProgress};
use mesh_protocol::{FileId, MediaKind};

/// One chat line in the local, unbounded history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: PeerId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a peer connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer announced `peer_leaving`.
    PeerLeft,
    /// The channel reached EOF.
    ChannelClosed,
    /// Reading or writing the channel failed.
    TransportFailure(String),
    /// Too many consecutive protocol violations.
    ProtocolViolations,
    /// We closed it: leave, kick or an explicit disconnect.
    LocalClose,
}

impl DisconnectReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PeerLeft => "peer_left",
            Self::ChannelClosed => "channel_closed",
            Self::TransportFailure(_) => "transport_failure",
            Self::ProtocolViolations => "protocol_violations",
            Self::LocalClose => "local_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    PeerConnected {
        peer_id: PeerId,
        session_id: Option<SessionId>,
    },
    PeerDisconnected {
        peer_id: PeerId,
        reason: DisconnectReason,
    },
    ChatReceived(ChatLine),
    MediaStateChanged {
        peer_id: PeerId,
        kind: MediaKind,
        enabled: bool,
    },
    RecordingChanged {
        peer_id: PeerId,
        recording: bool,
    },
    /// A remote peer announced a file.
    FileOffered {
        from: PeerId,
        descriptor: FileDescriptor,
    },
    /// Upload progress carries our own peer id in `peer_id`.
    FileProgress {
        peer_id: PeerId,
        file_id: FileId,
        direction: Direction,
        progress: TransferProgress,
    },
    FileReceived {
        from: PeerId,
        descriptor: FileDescriptor,
        data: Bytes,
    },
    /// The room admin muted us.
    ForcedMute,
    /// The room admin lifted our mute.
    ForcedUnmute,
    /// We were kicked. The ban is already recorded and the mesh is closing.
    Kicked { room_id: RoomId },
    /// The transport stopped accepting links. The mesh is closing and the
    /// participant leaves the registry on its own.
    TransportLost { room_id: RoomId },
    /// The admin applied an action to another member.
    PeerModerated {
        peer_id: PeerId,
        action: AdminAction,
    },
}
