//! Peer-to-peer message protocol for mesh rooms.
//!
//! Every pairwise channel between two participants carries a stream of
//! length-prefixed JSON frames. Each frame holds one [`message::Envelope`]:
//! the sender, a timestamp and one variant of the closed
//! [`message::MeshMessage`] union. Anything that does not decode into that
//! union is a protocol violation and is reported as such by [`codec`].
//!
//! File transfer is layered on top: [`transfer`] splits payloads into
//! fixed-size chunks and reassembles them by index on the receiving side.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod transfer;

pub use codec::CodecError;
pub use message::{Envelope, MediaKind, MeshMessage};
pub use transfer::{FileId, FileTransfer, TransferError};
