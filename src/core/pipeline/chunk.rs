//! Chunk bookkeeping shared by both directions.
//!
//! - [`ChunkSizer`]: sender-side adaptive chunk size driven by the channel's
//!   buffered-amount signal.
//! - [`ChunkSpan`]: the byte range the sender assigned to one chunk index.
//! - [`ChunkRecord`] / [`ChunkTable`]: receiver-side slots, one per index.
//!   A record can only be built from a payload whose length and digest match
//!   its announcement, so the table never holds unverified bytes.

use crate::core::config::TransferConfig;
use crate::core::error::TransferError;
use crate::core::security::integrity;

// ── Adaptive sizing ──────────────────────────────────────────────────────────

/// What the sender must do before emitting the next chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// Buffered bytes exceed the high water mark; wait for a drain.
    Congested,
    /// Room to send.
    Clear,
}

/// Chunk size controller. One instance per file.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    current: usize,
    consecutive_waits: u32,
    min: usize,
    max: usize,
    growth_percent: u32,
    max_waits: u32,
    high_water_mark: usize,
    low_water_mark: usize,
    adaptive: bool,
}

impl ChunkSizer {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            current: config.default_chunk_size,
            consecutive_waits: 0,
            min: config.min_chunk_size,
            max: config.max_chunk_size,
            growth_percent: config.growth_percent,
            max_waits: config.max_consecutive_waits,
            high_water_mark: config.high_water_mark,
            low_water_mark: config.low_water_mark,
            adaptive: config.adaptive_chunk_size,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn assess(&self, buffered: usize) -> Pressure {
        if buffered > self.high_water_mark {
            Pressure::Congested
        } else {
            Pressure::Clear
        }
    }

    /// Account for one completed drain wait; halves after too many in a row.
    pub fn record_wait(&mut self) {
        self.consecutive_waits += 1;
        if self.adaptive && self.consecutive_waits > self.max_waits {
            self.current = (self.current / 2).max(self.min);
            self.consecutive_waits = 0;
        }
    }

    /// Account for an iteration that did not wait; grows on a nearly empty buffer.
    pub fn record_clear(&mut self, buffered: usize) {
        self.consecutive_waits = 0;
        if self.adaptive && buffered < self.low_water_mark / 2 {
            let grown = self.current * (100 + self.growth_percent as usize) / 100;
            self.current = grown.min(self.max);
        }
    }

    pub fn consecutive_waits(&self) -> u32 {
        self.consecutive_waits
    }
}

/// Chunk count announced up front for `size` bytes at `chunk_size`.
pub fn planned_chunks(size: u64, chunk_size: usize) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size as u64) as u32
}

// ── Sender spans ─────────────────────────────────────────────────────────────

/// Byte range of one emitted chunk. Fixed once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub offset: u64,
    pub len: usize,
}

// ── Receiver slots ───────────────────────────────────────────────────────────

/// A verified chunk held by the receiver.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub index: u32,
    pub size: u32,
    pub checksum: String,
    payload: Vec<u8>,
}

impl ChunkRecord {
    /// Build a record only if `payload` matches the announced size and digest.
    pub fn verified(
        file_id: &str,
        index: u32,
        size: u32,
        checksum: &str,
        payload: Vec<u8>,
    ) -> Result<Self, TransferError> {
        let mismatch = || TransferError::ChunkChecksumMismatch {
            file_id: file_id.to_string(),
            chunk_index: index,
        };
        if payload.len() != size as usize {
            return Err(mismatch());
        }
        if !integrity::matches(&integrity::digest(&payload), checksum) {
            return Err(mismatch());
        }
        Ok(Self {
            index,
            size,
            checksum: checksum.to_string(),
            payload,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Outcome of placing a record in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Filled,
    Duplicate,
}

/// Receiver chunk table for one file.
#[derive(Debug, Default)]
pub struct ChunkTable {
    slots: Vec<Option<ChunkRecord>>,
    filled: u32,
}

impl ChunkTable {
    pub fn new(total_chunks: u32) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(total_chunks as usize, || None);
        Self { slots, filled: 0 }
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> u32 {
        self.filled
    }

    /// Grow the index space so `index` is addressable.
    pub fn ensure_index(&mut self, index: u32) {
        let needed = index as usize + 1;
        if needed > self.slots.len() {
            self.slots.resize_with(needed, || None);
        }
    }

    /// Set the index space to `total`. Shrinking only removes trailing empty slots.
    pub fn resize(&mut self, total: u32) {
        let total = total as usize;
        if total >= self.slots.len() {
            self.slots.resize_with(total, || None);
            return;
        }
        while self.slots.len() > total && matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    pub fn insert(&mut self, record: ChunkRecord) -> Placement {
        self.ensure_index(record.index);
        let slot = &mut self.slots[record.index as usize];
        if slot.is_some() {
            return Placement::Duplicate;
        }
        *slot = Some(record);
        self.filled += 1;
        Placement::Filled
    }

    pub fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Total plaintext bytes currently held.
    pub fn byte_len(&self) -> u64 {
        self.slots.iter().flatten().map(|r| r.size as u64).sum()
    }

    /// Concatenate all payloads in index order. `None` while any slot is empty.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if self.filled as usize != self.slots.len() {
            return None;
        }
        let mut out = Vec::with_capacity(self.byte_len() as usize);
        for record in self.slots.iter().flatten() {
            out.extend_from_slice(record.payload());
        }
        Some(out)
    }
}
