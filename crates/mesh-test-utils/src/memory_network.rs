//! In-memory peer transport.
//!
//! A shared [`MemoryNetwork`] routes links between [`MemoryTransport`]
//! instances. Every link is one `tokio::io::duplex` pipe split into the
//! channel's sink and source, plus a [`MemoryMedia`] handle per side whose
//! closed flag tests can inspect.

use async_trait::async_trait;
use common::types::PeerId;
use mesh_client::transport::{
    DataChannel, HandshakeMetadata, MediaStream, PeerLink, Transport, TransportError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const DUPLEX_BUF_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct NetworkState {
    peers: HashMap<PeerId, mpsc::Sender<PeerLink>>,
    /// Connection attempts to these peers never complete.
    stalled: HashSet<PeerId>,
    /// Media handles per owning peer, in link order.
    media: HashMap<PeerId, Vec<MemoryMedia>>,
}

/// Shared network broker.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork").finish_non_exhaustive()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id` and return its transport.
    pub async fn transport(&self, peer_id: impl Into<PeerId>) -> MemoryTransport {
        let peer_id = peer_id.into();
        let (accept_tx, accept_rx) = mpsc::channel(64);
        self.state
            .lock()
            .await
            .peers
            .insert(peer_id.clone(), accept_tx);
        MemoryTransport {
            peer_id,
            network: self.clone(),
            accept_rx: Arc::new(Mutex::new(accept_rx)),
        }
    }

    /// Make connection attempts to `peer_id` hang.
    pub async fn stall(&self, peer_id: &PeerId) {
        self.state.lock().await.stalled.insert(peer_id.clone());
    }

    /// Drop `peer_id` from the network. Its transport stops accepting.
    pub async fn remove(&self, peer_id: &PeerId) {
        self.state.lock().await.peers.remove(peer_id);
    }
}

/// Media handle of one side of a link.
#[derive(Clone, Debug)]
pub struct MemoryMedia {
    remote: PeerId,
    closed: Arc<AtomicBool>,
}

impl MemoryMedia {
    fn new(remote: PeerId) -> Self {
        Self {
            remote,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MediaStream for MemoryMedia {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory `Transport` bound to one peer id.
#[derive(Clone)]
pub struct MemoryTransport {
    peer_id: PeerId,
    network: MemoryNetwork,
    accept_rx: Arc<Mutex<mpsc::Receiver<PeerLink>>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Media handles of every link this transport opened or accepted.
    pub async fn media_streams(&self) -> Vec<MemoryMedia> {
        self.network
            .state
            .lock()
            .await
            .media
            .get(&self.peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Media handle for the link to `remote`, the most recent one.
    pub async fn media_for(&self, remote: &PeerId) -> Option<MemoryMedia> {
        self.media_streams()
            .await
            .into_iter()
            .rev()
            .find(|m| m.remote() == remote)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    async fn connect(
        &self,
        peer: &PeerId,
        metadata: HandshakeMetadata,
    ) -> Result<PeerLink, TransportError> {
        let accept_tx = {
            let state = self.network.state.lock().await;
            if state.stalled.contains(peer) {
                None
            } else {
                Some(
                    state
                        .peers
                        .get(peer)
                        .cloned()
                        .ok_or_else(|| TransportError::Unreachable(peer.to_string()))?,
                )
            }
        };
        let Some(accept_tx) = accept_tx else {
            std::future::pending::<()>().await;
            return Err(TransportError::Timeout);
        };

        let (local, remote) = tokio::io::duplex(DUPLEX_BUF_SIZE);
        let (local_source, local_sink) = tokio::io::split(local);
        let (remote_source, remote_sink) = tokio::io::split(remote);

        let local_media = MemoryMedia::new(peer.clone());
        let remote_media = MemoryMedia::new(self.peer_id.clone());
        {
            let mut state = self.network.state.lock().await;
            state
                .media
                .entry(self.peer_id.clone())
                .or_default()
                .push(local_media.clone());
            state
                .media
                .entry(peer.clone())
                .or_default()
                .push(remote_media.clone());
        }

        accept_tx
            .send(PeerLink {
                remote_peer_id: self.peer_id.clone(),
                remote_session_id: Some(metadata.session_id),
                channel: DataChannel::new(remote_sink, remote_source),
                media: Box::new(remote_media),
            })
            .await
            .map_err(|_| TransportError::Connect(format!("Peer {peer} stopped accepting")))?;

        Ok(PeerLink {
            remote_peer_id: peer.clone(),
            remote_session_id: None,
            channel: DataChannel::new(local_sink, local_source),
            media: Box::new(local_media),
        })
    }

    async fn accept(&self) -> Option<PeerLink> {
        self.accept_rx.lock().await.recv().await
    }
}
