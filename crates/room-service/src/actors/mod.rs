//! Actor model for room state.
//!
//! ```text
//! RoomRegistry (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room, owns all of its state)
//! ```
//!
//! - **One writer per room**: every mutation of a room runs inside its actor,
//!   so concurrent requests against one room are linearized
//! - **Direct dispatch**: the registry only resolves ids; room requests go
//!   straight to the room actor
//! - **CancellationToken propagation**: rooms get child tokens of the registry
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistry` supervisor and public handle
//! - [`room`] - `RoomActor` per room
//! - [`messages`] - Message and snapshot types
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::RoomRegistry;
pub use room::{RoomActor, RoomActorHandle, RoomSettings, MAX_CHAT_LENGTH};
