//! # Mesh Test Utilities
//!
//! Shared test utilities for the room service and the mesh client.
//!
//! This crate provides:
//! - Server test harness (`TestRoomServer` for E2E tests)
//! - In-memory peer network (`MemoryNetwork`, `MemoryTransport`)
//! - Fixtures for participants wired to both
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRoomServer::spawn().await?;
//!     let network = MemoryNetwork::new();
//!
//!     let mut alice = participant(&server, &network, "A", "sA").await?;
//!     alice.create_room(&"r1".into(), &"abcd".into()).await?;
//!     alice.join("r1".into(), "abcd".into()).await?;
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod memory_network;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use memory_network::*;
pub use server_harness::*;
