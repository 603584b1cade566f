//! File transfer bookkeeping for one participant.
//!
//! Downloads are keyed by `(sender, file_id)` since a file id is only unique
//! per sender. A finished transfer's buffer is released at once; its final
//! progress lingers in `finished` until the grace period removes it.

use bytes::Bytes;
use common::types::PeerId;
use mesh_protocol::transfer::{
    ChunkOutcome, Direction, FileDescriptor, TransferProgress,
};
use mesh_protocol::{FileId, FileTransfer, TransferError};
use std::collections::HashMap;

/// Unfinished downloads one sender may have open at a time.
pub const MAX_ACTIVE_DOWNLOADS_PER_PEER: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransferKey {
    Upload(FileId),
    Download(PeerId, FileId),
}

/// Progress of one transfer, active or recently finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub key: TransferKey,
    pub file_name: String,
    pub direction: Direction,
    pub progress: TransferProgress,
    pub finished: bool,
}

/// Result of storing a received chunk.
#[derive(Debug)]
pub enum ChunkReceipt {
    Stored(TransferProgress),
    Duplicate,
    Complete {
        descriptor: FileDescriptor,
        data: Bytes,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("No transfer announced for file {0}")]
    UnknownFile(FileId),

    #[error("Sender already has {limit} downloads in progress")]
    TooManyDownloads { limit: usize },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[derive(Debug, Default)]
pub struct TransferBook {
    active: HashMap<TransferKey, FileTransfer>,
    finished: HashMap<TransferKey, (String, Direction, TransferProgress)>,
}

impl TransferBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file id for a new upload, unique among our live and lingering uploads.
    pub fn next_upload_id(&self, submitted_at_ms: i64, file_name: &str) -> FileId {
        let mut at = submitted_at_ms;
        loop {
            let candidate = FileId::derive(at, file_name);
            let key = TransferKey::Upload(candidate.clone());
            if !self.active.contains_key(&key) && !self.finished.contains_key(&key) {
                return candidate;
            }
            at += 1;
        }
    }

    /// Track an upload. Zero-chunk files finish immediately.
    pub fn begin_upload(&mut self, descriptor: FileDescriptor) -> TransferKey {
        let key = TransferKey::Upload(descriptor.file_id.clone());
        let transfer = FileTransfer::upload(descriptor);
        if transfer.is_complete() {
            self.finish(key.clone(), &transfer);
        } else {
            self.active.insert(key.clone(), transfer);
        }
        key
    }

    /// Count one chunk handed to the transport. `None` for unknown uploads.
    pub fn record_upload_chunk(&mut self, file_id: &FileId) -> Option<(ChunkOutcome, TransferProgress)> {
        let key = TransferKey::Upload(file_id.clone());
        let transfer = self.active.get_mut(&key)?;
        let outcome = transfer.record_sent();
        let progress = transfer.progress();
        if outcome == ChunkOutcome::Complete {
            if let Some(transfer) = self.active.remove(&key) {
                self.finish(key, &transfer);
            }
        }
        Some((outcome, progress))
    }

    /// Start receiving a file announced by `from`.
    ///
    /// A repeated announcement for an in-flight file restarts it. A zero-chunk
    /// file is complete on arrival and returned as such. A sender with
    /// [`MAX_ACTIVE_DOWNLOADS_PER_PEER`] unfinished files is refused.
    pub fn offer(
        &mut self,
        from: &PeerId,
        descriptor: FileDescriptor,
    ) -> Result<Option<ChunkReceipt>, ReceiveError> {
        let key = TransferKey::Download(from.clone(), descriptor.file_id.clone());
        let open = self
            .active
            .keys()
            .filter(|k| matches!(k, TransferKey::Download(sender, _) if sender == from) && **k != key)
            .count();
        if open >= MAX_ACTIVE_DOWNLOADS_PER_PEER {
            return Err(ReceiveError::TooManyDownloads {
                limit: MAX_ACTIVE_DOWNLOADS_PER_PEER,
            });
        }

        let mut transfer = FileTransfer::download(descriptor)?;
        if transfer.is_complete() {
            let data = transfer.assemble()?;
            let descriptor = transfer.descriptor().clone();
            self.finish(key, &transfer);
            return Ok(Some(ChunkReceipt::Complete { descriptor, data }));
        }
        self.finished.remove(&key);
        self.active.insert(key, transfer);
        Ok(None)
    }

    /// Store chunk `index` of `file_id` from `from`.
    pub fn receive_chunk(
        &mut self,
        from: &PeerId,
        file_id: &FileId,
        index: u32,
        data: Bytes,
    ) -> Result<ChunkReceipt, ReceiveError> {
        let key = TransferKey::Download(from.clone(), file_id.clone());
        let transfer = self
            .active
            .get_mut(&key)
            .ok_or_else(|| ReceiveError::UnknownFile(file_id.clone()))?;

        match transfer.insert_chunk(index, data)? {
            ChunkOutcome::Stored => Ok(ChunkReceipt::Stored(transfer.progress())),
            ChunkOutcome::Duplicate => Ok(ChunkReceipt::Duplicate),
            ChunkOutcome::Complete => {
                let data = transfer.assemble()?;
                let descriptor = transfer.descriptor().clone();
                if let Some(transfer) = self.active.remove(&key) {
                    self.finish(key, &transfer);
                }
                Ok(ChunkReceipt::Complete { descriptor, data })
            }
        }
    }

    /// Drop every unfinished download from `peer`. Returns how many.
    pub fn abandon_peer(&mut self, peer: &PeerId) -> usize {
        let before = self.active.len();
        self.active
            .retain(|key, _| !matches!(key, TransferKey::Download(from, _) if from == peer));
        before - self.active.len()
    }

    /// Forget a finished transfer once its grace period is over.
    pub fn clear_finished(&mut self, key: &TransferKey) -> bool {
        self.finished.remove(key).is_some()
    }

    /// Drop a transfer, active or finished.
    pub fn cancel(&mut self, key: &TransferKey) -> bool {
        let active = self.active.remove(key).is_some();
        let finished = self.finished.remove(key).is_some();
        active || finished
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.active.clear();
        self.finished.clear();
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// All active and lingering transfers, active first.
    #[must_use]
    pub fn statuses(&self) -> Vec<TransferStatus> {
        let active = self.active.iter().map(|(key, transfer)| TransferStatus {
            key: key.clone(),
            file_name: transfer.descriptor().file_name.clone(),
            direction: transfer.direction(),
            progress: transfer.progress(),
            finished: false,
        });
        let finished = self
            .finished
            .iter()
            .map(|(key, (file_name, direction, progress))| TransferStatus {
                key: key.clone(),
                file_name: file_name.clone(),
                direction: *direction,
                progress: *progress,
                finished: true,
            });
        active.chain(finished).collect()
    }

    fn finish(&mut self, key: TransferKey, transfer: &FileTransfer) {
        self.finished.insert(
            key,
            (
                transfer.descriptor().file_name.clone(),
                transfer.direction(),
                transfer.progress(),
            ),
        );
    }
}
