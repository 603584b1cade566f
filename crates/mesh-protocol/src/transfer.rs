//! File chunking and reassembly.
//!
//! A sender announces a file with `file_metadata`, then streams
//! `ceil(size / chunk_size)` `file_chunk` messages over the same channel.
//! The receiver stores each chunk at its index and rebuilds the payload once
//! every slot is filled. A file identifier is only unique per sender, so
//! receivers key transfers by `(sender, file_id)`.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on announced chunk counts. Keeps a hostile `file_metadata`
/// from forcing a huge buffer allocation.
pub const MAX_TOTAL_CHUNKS: u32 = 65_536;

/// Errors from chunking or reassembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("File needs {0} chunks, limit is {MAX_TOTAL_CHUNKS}")]
    TooManyChunks(u64),

    #[error("Chunk {index} out of range for {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Transfer incomplete: {received}/{total} chunks")]
    Incomplete { received: u32, total: u32 },

    #[error("Transfer already delivered")]
    AlreadyDelivered,

    #[error("Chunks exceed the announced {announced} bytes")]
    SizeExceeded { announced: u64 },
}

/// Sender-scoped file identifier, derived from submission time and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// `"{submitted_at_ms}-{file_name}"`.
    #[must_use]
    pub fn derive(submitted_at_ms: i64, file_name: &str) -> Self {
        Self(format!("{submitted_at_ms}-{file_name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which side of a transfer this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// Everything announced about a file before its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_id: FileId,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

/// Number of chunks needed for `size` bytes: `ceil(size / chunk_size)`.
///
/// # Errors
///
/// [`TransferError::InvalidChunkSize`] for a zero chunk size,
/// [`TransferError::TooManyChunks`] above [`MAX_TOTAL_CHUNKS`].
pub fn chunk_count(size: u64, chunk_size: usize) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    let chunk_size = chunk_size as u64;
    let count = size.div_ceil(chunk_size);
    u32::try_from(count)
        .ok()
        .filter(|c| *c <= MAX_TOTAL_CHUNKS)
        .ok_or(TransferError::TooManyChunks(count))
}

/// Split a payload into consecutive chunks of at most `chunk_size` bytes.
///
/// The returned slices share the payload's allocation.
///
/// # Errors
///
/// Same conditions as [`chunk_count`].
pub fn split_into_chunks(payload: &Bytes, chunk_size: usize) -> Result<Vec<Bytes>, TransferError> {
    let count = chunk_count(payload.len() as u64, chunk_size)?;
    let mut chunks = Vec::with_capacity(count as usize);
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + chunk_size).min(payload.len());
        chunks.push(payload.slice(offset..end));
        offset = end;
    }
    Ok(chunks)
}

/// Progress of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub done: u32,
    pub total: u32,
}

impl TransferProgress {
    /// Whole-number percentage; an empty file counts as 100%.
    #[must_use]
    pub fn percent(self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = u64::from(self.done) * 100 / u64::from(self.total);
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Result of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored,
    /// Slot was already filled; the copy is ignored.
    Duplicate,
    /// This chunk filled the last empty slot.
    Complete,
}

/// State of one in-flight file, in either direction.
#[derive(Debug)]
pub struct FileTransfer {
    descriptor: FileDescriptor,
    direction: Direction,
    chunks: Vec<Option<Bytes>>,
    received_count: u32,
    buffered_bytes: u64,
    delivered: bool,
}

impl FileTransfer {
    /// Allocate a download buffer with one slot per announced chunk.
    ///
    /// # Errors
    ///
    /// [`TransferError::TooManyChunks`] when the announcement exceeds
    /// [`MAX_TOTAL_CHUNKS`].
    pub fn download(descriptor: FileDescriptor) -> Result<Self, TransferError> {
        if descriptor.total_chunks > MAX_TOTAL_CHUNKS {
            return Err(TransferError::TooManyChunks(u64::from(descriptor.total_chunks)));
        }
        let slots = descriptor.total_chunks as usize;
        Ok(Self {
            descriptor,
            direction: Direction::Download,
            chunks: vec![None; slots],
            received_count: 0,
            buffered_bytes: 0,
            delivered: false,
        })
    }

    /// Track an outgoing file. Uploads count chunks handed to the channel
    /// and never buffer data.
    #[must_use]
    pub fn upload(descriptor: FileDescriptor) -> Self {
        Self {
            descriptor,
            direction: Direction::Upload,
            chunks: Vec::new(),
            received_count: 0,
            buffered_bytes: 0,
            delivered: false,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn received_count(&self) -> u32 {
        self.received_count
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.received_count >= self.descriptor.total_chunks
    }

    #[must_use]
    pub const fn progress(&self) -> TransferProgress {
        TransferProgress {
            done: self.received_count,
            total: self.descriptor.total_chunks,
        }
    }

    /// Store a received chunk at its index.
    ///
    /// # Errors
    ///
    /// [`TransferError::ChunkOutOfRange`] for an index past the announced
    /// count, [`TransferError::SizeExceeded`] when the buffered bytes would
    /// pass the announced file size, [`TransferError::AlreadyDelivered`] once
    /// the payload was handed out.
    pub fn insert_chunk(&mut self, index: u32, data: Bytes) -> Result<ChunkOutcome, TransferError> {
        if self.delivered {
            return Err(TransferError::AlreadyDelivered);
        }
        let total = self.descriptor.total_chunks;
        let announced = self.descriptor.file_size;
        let slot = self
            .chunks
            .get_mut(index as usize)
            .ok_or(TransferError::ChunkOutOfRange { index, total })?;

        if slot.is_some() {
            return Ok(ChunkOutcome::Duplicate);
        }
        let buffered = self.buffered_bytes.saturating_add(data.len() as u64);
        if buffered > announced {
            return Err(TransferError::SizeExceeded { announced });
        }
        *slot = Some(data);
        self.buffered_bytes = buffered;
        self.received_count += 1;

        if self.is_complete() {
            Ok(ChunkOutcome::Complete)
        } else {
            Ok(ChunkOutcome::Stored)
        }
    }

    /// Count one chunk of an upload as sent.
    pub fn record_sent(&mut self) -> ChunkOutcome {
        if self.is_complete() {
            return ChunkOutcome::Duplicate;
        }
        self.received_count += 1;
        if self.is_complete() {
            ChunkOutcome::Complete
        } else {
            ChunkOutcome::Stored
        }
    }

    /// Concatenate all chunks in index order and release the buffer.
    ///
    /// # Errors
    ///
    /// [`TransferError::Incomplete`] while slots are still empty,
    /// [`TransferError::AlreadyDelivered`] on a second call.
    pub fn assemble(&mut self) -> Result<Bytes, TransferError> {
        if self.delivered {
            return Err(TransferError::AlreadyDelivered);
        }
        if !self.is_complete() {
            return Err(TransferError::Incomplete {
                received: self.received_count,
                total: self.descriptor.total_chunks,
            });
        }

        let size = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(size);
        for chunk in std::mem::take(&mut self.chunks).into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        self.delivered = true;
        Ok(out.freeze())
    }
}
