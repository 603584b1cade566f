//! Mesh Client Library
//!
//! Participant side of a mesh room. A participant is admitted through the
//! room service, then opens one direct channel to every other member and
//! exchanges chat, media state, moderation and files over those channels.
//!
//! # Architecture
//!
//! ```text
//! admission::Participant -> directory::RoomDirectory (room service)
//!                        -> mesh::MeshManager -> transport::Transport
//!                                             -> engine::dispatch
//! ```
//!
//! The transport is a trait seam. Production code plugs in a real
//! connection stack; tests use the in-memory network from
//! `mesh-test-utils`.
//!
//! # Modules
//!
//! - `admission` - Join/leave state machine and moderation requests
//! - `config` - Client configuration from environment
//! - `directory` - Room service client and a scripted mock
//! - `engine` - Inbound message dispatch and protocol violations
//! - `errors` - Client error taxonomy
//! - `events` - Events delivered to the application
//! - `mesh` - Per-peer connections, broadcast and file sharing
//! - `models` - Room service response bodies
//! - `moderation` - Persistent ban list and local media state
//! - `observability` - Metrics
//! - `transfers` - In-flight file transfer bookkeeping
//! - `transport` - Peer connection abstraction

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod admission;
pub mod config;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod events;
pub mod mesh;
pub mod models;
pub mod moderation;
pub mod observability;
pub mod transfers;
pub mod transport;

pub use admission::{AdmissionState, JoinedRoom, Participant};
pub use config::ClientConfig;
pub use errors::ClientError;
pub use events::{DisconnectReason, MeshEvent};
pub use mesh::MeshManager;
pub use transport::{PeerLink, Transport, TransportError};
