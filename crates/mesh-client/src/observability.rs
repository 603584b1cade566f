//! Participant metrics.
//!
//! Emitted through the `metrics` facade; the embedding application decides
//! whether a recorder is installed. All metric names carry the `mesh_`
//! prefix. Labels are bounded: message kinds come from the closed protocol
//! union and violation reasons from [`crate::engine::ProtocolViolation`].

use metrics::{counter, gauge};

/// Current number of open peer connections.
pub fn set_peers_connected(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_peers_connected").set(count as f64);
}

/// One protocol message sent (`out`) or received (`in`).
pub fn record_message(kind: &'static str, direction: &'static str) {
    counter!("mesh_messages_total", "type" => kind, "direction" => direction).increment(1);
}

pub fn record_protocol_violation(reason: &'static str) {
    counter!("mesh_protocol_violations_total", "reason" => reason).increment(1);
}

/// A broadcast could not be handed to one peer.
pub fn record_broadcast_failure() {
    counter!("mesh_broadcast_failures_total").increment(1);
}

/// A file transfer finished (`completed`) or was dropped (`abandoned`, `rejected`).
pub fn record_file_transfer(direction: &'static str, status: &'static str) {
    counter!(
        "mesh_file_transfers_total",
        "direction" => direction,
        "status" => status
    )
    .increment(1);
}

/// Outcome of an outbound connection attempt: `connected`, `duplicate`,
/// `timeout` or `failed`.
pub fn record_connect_attempt(outcome: &'static str) {
    counter!("mesh_connect_attempts_total", "outcome" => outcome).increment(1);
}
