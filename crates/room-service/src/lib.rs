//! Room Service Library
//!
//! Authoritative registry of mesh rooms: membership, moderation state and
//! bounded chat history, exposed over a small JSON HTTP API.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> actors::RoomRegistry -> actors::RoomActor
//! ```
//!
//! Each room is owned by exactly one actor task, which serializes every
//! mutation of that room. Different rooms never contend with each other.
//!
//! # Modules
//!
//! - `actors` - Registry supervisor and per-room actors
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `models` - Request and response bodies
//! - `observability` - Metrics and health endpoints
//! - `routes` - Axum router setup

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
