//! HTTP routes for the room service.
//!
//! Defines the Axum router and application state.

use crate::actors::RoomRegistry;
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::observability::{health_router, HealthState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide room registry.
    pub registry: RoomRegistry,

    /// Service configuration.
    pub config: Config,

    /// Liveness/readiness flags, flipped by `main` during startup and shutdown.
    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes
/// - `/metrics` - Prometheus scrape endpoint
/// - `/api/rooms` - directory listing
/// - `/api/rooms/{create,verify,join,leave,actions,messages}` - room API
/// - `/api/rooms/:room_id` - room details
///
/// Layer order (bottom-to-top execution): timeout, trace, then HTTP metrics
/// outermost so every response is counted.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let health_routes = health_router(Arc::clone(&state.health));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let request_timeout = state.config.request_timeout;

    let room_routes = Router::new()
        .route("/api/rooms", get(handlers::list_rooms))
        .route("/api/rooms/create", post(handlers::create_room))
        .route("/api/rooms/verify", post(handlers::verify_room))
        .route("/api/rooms/join", post(handlers::join_room))
        .route("/api/rooms/leave", post(handlers::leave_room))
        .route("/api/rooms/actions", post(handlers::room_action))
        .route("/api/rooms/messages", post(handlers::add_message))
        .route("/api/rooms/:room_id", get(handlers::room_info))
        .with_state(state);

    health_routes
        .merge(metrics_routes)
        .merge(room_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
