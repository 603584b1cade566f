//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rs_` prefix for the room service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max
//! - `endpoint`: ~12 values (room ids are replaced by a placeholder)
//! - `status`: 3 values for HTTP (success, error, timeout), error codes for operations
//! - `operation`: bounded by code (create, verify, join, leave, action, message)
//! - `actor_type`: 2 values (registry, room)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle used
/// to serve `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rs_http_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Room operations are in-memory; most complete well under a millisecond
        .set_buckets_for_metric(
            Matcher::Prefix("rs_room_operation".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set room operation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rs_http_requests_total`, `rs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" | "/api/rooms" | "/api/rooms/create"
        | "/api/rooms/verify" | "/api/rooms/join" | "/api/rooms/leave"
        | "/api/rooms/actions" | "/api/rooms/messages" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace room ids with a placeholder.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    // /api/rooms/{room_id} → ["", "api", "rooms", id]
    if parts.len() == 4 && path.starts_with("/api/rooms/") {
        if let Some(id) = parts.get(3) {
            if !id.is_empty() {
                return "/api/rooms/{room_id}".to_string();
            }
        }
    }

    "/other".to_string()
}

// ============================================================================
// Room Operation Metrics
// ============================================================================

/// Record a registry operation.
///
/// Metric: `rs_room_operation_duration_seconds`, `rs_room_operations_total`
/// Labels: `operation`, `status`
pub fn record_room_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("rs_room_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rs_room_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Actor Gauges
// ============================================================================

/// Metric: `rs_rooms_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_rooms_active(count: usize) {
    gauge!("rs_rooms_active").set(count as f64);
}

/// Metric: `rs_members_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_members_active(count: usize) {
    gauge!("rs_members_active").set(count as f64);
}

/// Metric: `rs_actor_mailbox_depth`
/// Labels: `actor_type`
#[allow(clippy::cast_precision_loss)]
pub fn set_mailbox_depth(actor_type: &str, depth: usize) {
    gauge!("rs_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Metric: `rs_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("rs_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests exercise the recording functions against the global no-op
    // recorder; values are not inspected.

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(1));
        record_http_request("POST", "/api/rooms/join", 200, Duration::from_millis(3));
        record_http_request("POST", "/api/rooms/join", 403, Duration::from_millis(2));
        record_http_request("GET", "/api/rooms/abc", 404, Duration::from_millis(1));
        record_http_request("POST", "/api/rooms/create", 504, Duration::from_secs(30));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(299), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(409), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/api/rooms"), "/api/rooms");
        assert_eq!(normalize_endpoint("/api/rooms/actions"), "/api/rooms/actions");
    }

    #[test]
    fn test_normalize_endpoint_room_ids() {
        assert_eq!(normalize_endpoint("/api/rooms/my-room"), "/api/rooms/{room_id}");
        assert_eq!(
            normalize_endpoint("/api/rooms/0b5f7c0e-2d1a"),
            "/api/rooms/{room_id}"
        );
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/api/rooms/a/b"), "/other");
        assert_eq!(normalize_endpoint("/api/rooms/"), "/other");
        assert_eq!(normalize_endpoint("/random"), "/other");
    }

    #[test]
    fn test_actor_gauges() {
        set_rooms_active(3);
        set_members_active(7);
        set_mailbox_depth("room", 2);
        record_actor_panic("room");
        record_room_operation("join", "success", Duration::from_micros(200));
        record_room_operation("join", "ROOM_LOCKED", Duration::from_micros(80));
    }
}
