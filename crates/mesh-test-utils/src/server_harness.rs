//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real room service instances in tests.

use metrics_exporter_prometheus::PrometheusBuilder;
use room_service::actors::{ActorMetrics, RoomRegistry};
use room_service::config::Config;
use room_service::observability::HealthState;
use room_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the room service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRoomServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    config: Config,
    registry: RoomRegistry,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn a server, overriding configuration variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use a Prometheus recorder that is not installed globally
    /// - Report ready immediately
    pub async fn spawn_with_vars(
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let registry = RoomRegistry::from_config(&config, ActorMetrics::new());
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            registry: registry.clone(),
            config: config.clone(),
            health: Arc::clone(&health),
        });

        // Each server gets its own recorder handle; nothing is installed.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            registry,
            health,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the registry behind the HTTP API.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Liveness and readiness flags of the server.
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.registry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let response = reqwest::get(format!("{}/ready", server.url())).await?;
        assert_eq!(response.status(), 200);

        Ok(())
    }

    #[tokio::test]
    async fn test_server_applies_overrides() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn_with_vars(HashMap::from([(
            "HISTORY_CAPACITY".to_string(),
            "5".to_string(),
        )]))
        .await?;

        assert_eq!(server.config().history_capacity, 5);
        assert_eq!(server.config().bind_address, "127.0.0.1:0");
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestRoomServer::spawn().await?;
        let server2 = TestRoomServer::spawn().await?;

        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
