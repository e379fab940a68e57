//! Receiver-side state for one incoming file.
//!
//! Lifecycle: `file-metadata` creates the state, each `chunk-metadata` plus
//! its ciphertext frame is ingested, and `transfer-complete` either yields
//! the missing indices to request or the verified reassembled bytes.
//!
//! # Integrity
//!
//! A chunk is stored only after AEAD authentication and a digest/size check
//! against its announcement. The reassembled file is checked once more
//! against the whole-file digest from `file-metadata` before delivery.

use crate::core::error::TransferError;
use crate::core::pipeline::chunk::{ChunkRecord, ChunkTable, Placement};
use crate::core::protocol::messages::{ChunkMetadata, FileMetadata};
use crate::core::security::integrity;
use crate::core::security::ChunkCipher;

/// Result of a `transfer-complete` for this file.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Holes remain; these indices must be requested again.
    Missing(Vec<u32>),
    /// All chunks present and the whole-file digest matches.
    Verified(Vec<u8>),
    /// All chunks present but the reassembled bytes are wrong.
    Corrupt,
}

pub(crate) struct ReceivingFile {
    pub metadata: FileMetadata,
    table: ChunkTable,
}

impl ReceivingFile {
    pub fn new(metadata: FileMetadata) -> Self {
        let total = metadata.total_chunks.min(max_chunks(metadata.size));
        Self {
            table: ChunkTable::new(total),
            metadata,
        }
    }

    /// Every chunk carries at least one byte, so no index reaches `size`.
    pub fn accepts_index(&self, index: u32) -> bool {
        index < max_chunks(self.metadata.size)
    }

    /// Decrypt and verify one chunk, then store it.
    pub fn ingest(
        &mut self,
        cipher: &ChunkCipher,
        announced: &ChunkMetadata,
        frame: &[u8],
    ) -> Result<Placement, TransferError> {
        let plaintext = cipher.decrypt(frame)?;
        let record = ChunkRecord::verified(
            &self.metadata.file_id,
            announced.chunk_index,
            announced.size,
            &announced.checksum,
            plaintext,
        )?;
        Ok(self.table.insert(record))
    }

    /// `(filled, total)` for progress reporting.
    pub fn progress(&self) -> (u32, u32) {
        (self.table.filled(), self.table.len())
    }

    /// Handle `transfer-complete`, optionally carrying the final chunk count.
    pub fn complete(&mut self, total_chunks: Option<u32>) -> Completion {
        if let Some(total) = total_chunks {
            self.table.resize(total.min(max_chunks(self.metadata.size)));
        }

        let missing = self.table.missing();
        if !missing.is_empty() {
            return Completion::Missing(missing);
        }

        let Some(bytes) = self.table.assemble() else {
            return Completion::Missing(self.table.missing());
        };
        if bytes.len() as u64 == self.metadata.size
            && integrity::matches(&integrity::digest(&bytes), &self.metadata.full_file_checksum)
        {
            Completion::Verified(bytes)
        } else {
            Completion::Corrupt
        }
    }
}

fn max_chunks(size: u64) -> u32 {
    size.min(u32::MAX as u64) as u32
}
