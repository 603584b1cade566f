//! Room Service
//!
//! Entry point for the mesh room registry.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the room registry actor
//! 4. Serve the HTTP API and mark the service ready
//! 5. On SIGTERM/Ctrl-C: mark not ready, stop the listener, drain rooms

#![warn(clippy::pedantic)]

use room_service::actors::{ActorMetrics, RoomRegistry};
use room_service::config::Config;
use room_service::observability::metrics::init_metrics_recorder;
use room_service::observability::HealthState;
use room_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_service=info,rs=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        history_capacity = config.history_capacity,
        empty_room_ttl_secs = config.empty_room_ttl.as_secs(),
        require_secret_when_unlocked = config.require_secret_when_unlocked,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health = Arc::new(HealthState::new());
    let registry = RoomRegistry::from_config(&config, ActorMetrics::new());
    let shutdown_timeout = config.shutdown_timeout;

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        registry: registry.clone(),
        config,
        health: Arc::clone(&health),
    });
    let app = routes::build_routes(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;

    health.set_ready();
    info!("Room Service listening on {}", addr);

    let shutdown_health = Arc::clone(&health);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Stop advertising readiness before the listener closes.
        shutdown_health.set_not_ready();
    })
    .await?;

    if let Err(e) = registry.shutdown(shutdown_timeout).await {
        warn!(error = %e, "Room registry shutdown error");
    }

    info!("Room Service shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
