//! Participant fixtures and event helpers.

use crate::memory_network::{MemoryNetwork, MemoryTransport};
use crate::server_harness::TestRoomServer;
use common::types::SessionId;
use mesh_client::config::ClientConfig;
use mesh_client::directory::HttpRoomDirectory;
use mesh_client::moderation::BanList;
use mesh_client::{MeshEvent, Participant};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long event helpers wait before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration pointing at `server`, with short timeouts.
pub fn client_config(server: &TestRoomServer) -> ClientConfig {
    ClientConfig {
        room_service_url: server.url(),
        connect_timeout: Duration::from_millis(500),
        transfer_grace: Duration::from_millis(200),
        ..ClientConfig::default()
    }
}

/// A participant talking HTTP to `server` and connecting over `network`.
///
/// Each call registers a fresh transport, so peer ids must be unique per
/// network. Pass the same `bans` to model a rejoin from the same device.
pub async fn participant_with_bans(
    server: &TestRoomServer,
    network: &MemoryNetwork,
    peer_id: &str,
    session_id: &str,
    bans: Arc<BanList>,
) -> Result<(Participant, MemoryTransport), anyhow::Error> {
    let config = client_config(server);
    let directory = HttpRoomDirectory::new(&config)?;
    let transport = network.transport(peer_id).await;
    let participant = Participant::new(
        Arc::new(directory),
        Arc::new(transport.clone()),
        config,
        SessionId::from(session_id),
        bans,
    );
    Ok((participant, transport))
}

/// A participant with its own in-memory ban list.
pub async fn participant(
    server: &TestRoomServer,
    network: &MemoryNetwork,
    peer_id: &str,
    session_id: &str,
) -> Result<(Participant, MemoryTransport), anyhow::Error> {
    participant_with_bans(
        server,
        network,
        peer_id,
        session_id,
        Arc::new(BanList::in_memory()),
    )
    .await
}

/// Receive events until one matches, skipping the rest.
///
/// # Panics
///
/// When no matching event arrives within [`EVENT_TIMEOUT`] or the stream ends.
pub async fn wait_for_event<F>(events: &mut mpsc::Receiver<MeshEvent>, mut matches: F) -> MeshEvent
where
    F: FnMut(&MeshEvent) -> bool,
{
    let found = tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event stream ended before the expected event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// When it does not hold within [`EVENT_TIMEOUT`].
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within {EVENT_TIMEOUT:?}");
}
