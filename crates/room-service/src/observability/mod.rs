//! Observability for the room service.
//!
//! - [`metrics`] - Prometheus metric definitions and recorder setup
//! - [`health`] - Liveness and readiness state with its router

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
