//! Transport adapter seam.
//!
//! The mesh never negotiates connections itself. A [`Transport`] hands it a
//! [`PeerLink`] per remote participant: an ordered, reliable byte channel for
//! protocol frames plus an opaque media stream. Production wires this to a
//! real-time peer transport; tests use an in-memory network.

use async_trait::async_trait;
use common::types::{PeerId, SessionId};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Accept failed: {0}")]
    Accept(String),

    #[error("Channel closed")]
    Closed,
}

/// Metadata the initiator attaches to an outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMetadata {
    pub session_id: SessionId,
}

/// Send half of a data channel.
pub type ChannelSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Receive half of a data channel.
pub type ChannelSource = Box<dyn AsyncRead + Send + Unpin>;

/// Ordered reliable byte channel, already split.
pub struct DataChannel {
    pub sink: ChannelSink,
    pub source: ChannelSource,
}

impl DataChannel {
    pub fn new(
        sink: impl AsyncWrite + Send + Unpin + 'static,
        source: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel").finish_non_exhaustive()
    }
}

/// Parallel media stream of a link. Rendering lives outside this crate; the
/// mesh only needs to release it when the peer goes away.
pub trait MediaStream: Send + Sync + fmt::Debug {
    fn close(&self);
}

/// An open connection to one remote participant.
#[derive(Debug)]
pub struct PeerLink {
    pub remote_peer_id: PeerId,
    /// Known on accepted links (the initiator sends it); `None` on links we
    /// initiated.
    pub remote_session_id: Option<SessionId>,
    pub channel: DataChannel,
    pub media: Box<dyn MediaStream>,
}

/// Peer transport abstraction.
///
/// One transport instance is bound to one local peer identifier.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The local peer identifier connections are made from.
    fn local_peer_id(&self) -> PeerId;

    /// Open a channel and media stream to `peer`.
    async fn connect(
        &self,
        peer: &PeerId,
        metadata: HandshakeMetadata,
    ) -> Result<PeerLink, TransportError>;

    /// Wait for the next inbound link. `None` once the transport is shut down.
    async fn accept(&self) -> Option<PeerLink>;
}
