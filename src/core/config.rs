//! Centralized configuration for swaz.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (message tags, nonce sizes)
//! stay in their respective modules.
//!
//! The constants are the defaults; [`TransferConfig`] and [`AppConfig`]
//! make them overridable from a TOML file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Chunk size every file starts with (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Floor for adaptive shrinking (16 KB).
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;

/// Ceiling for adaptive growth (256 KB).
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Growth applied to the chunk size when the channel is nearly empty.
pub const CHUNK_GROWTH_PERCENT: u32 = 10;

/// Consecutive high-water waits tolerated before the chunk size is halved.
pub const MAX_CONSECUTIVE_BUFFER_WAITS: u32 = 2;

/// Read buffer used while digesting a disk-backed file before sending.
pub const HASH_READ_BUFFER: usize = 256 * 1024;

// ── Backpressure ─────────────────────────────────────────────────────────────

/// High water mark for the channel send buffer (bytes).
/// Above this the sender suspends until the transport signals a drain.
pub const HIGH_WATER_MARK: usize = 15 * 1024 * 1024; // 15 MB

/// Low water mark for the channel send buffer (bytes).
/// The transport's "buffer drained" signal fires below this value.
pub const LOW_WATER_MARK: usize = 8 * 1024 * 1024; // 8 MB

// ── Encryption ───────────────────────────────────────────────────────────────

/// Encryptions allowed under one session key with random 96-bit nonces (2^32).
pub const MAX_ENCRYPTIONS_PER_KEY: u64 = 1 << 32;

// ── Channels ─────────────────────────────────────────────────────────────────

/// Capacity of the inbound transport event queue.
/// A full queue stalls the transport reader, which is how the receiver
/// pushes back on a fast sender.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Rendezvous ───────────────────────────────────────────────────────────────

/// Default bind host for the rendezvous server.
pub const DEFAULT_SIGNAL_HOST: &str = "0.0.0.0";

/// Default bind port for the rendezvous server.
pub const DEFAULT_SIGNAL_PORT: u16 = 8080;

/// Members allowed in one room.
pub const ROOM_CAPACITY: usize = 2;

/// Largest signaling message accepted by the server (SDP blobs are a few KB).
pub const SIGNAL_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// ── Persistence ──────────────────────────────────────────────────────────────

/// File name of the transfer history inside the data directory.
pub const HISTORY_FILE: &str = "history.json";

/// Entries kept in the transfer history; older ones are dropped.
pub const HISTORY_LIMIT: usize = 50;

/// File name of the pending scheduled job inside the data directory.
pub const SCHEDULED_JOB_FILE: &str = "scheduled_job.json";

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

// ── Runtime configuration ────────────────────────────────────────────────────

/// Tuning knobs for the transfer coordinator.
///
/// The adaptive-sizing thresholds are heuristics, not protocol requirements;
/// both peers may run with different values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub default_chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub growth_percent: u32,
    pub max_consecutive_waits: u32,
    /// When `false` every chunk is exactly `default_chunk_size` (except the last).
    pub adaptive_chunk_size: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            low_water_mark: LOW_WATER_MARK,
            growth_percent: CHUNK_GROWTH_PERCENT,
            max_consecutive_waits: MAX_CONSECUTIVE_BUFFER_WAITS,
            adaptive_chunk_size: true,
        }
    }
}

impl TransferConfig {
    /// Configuration that never resizes chunks.
    pub fn fixed_chunk_size(chunk_size: usize) -> Self {
        Self {
            default_chunk_size: chunk_size,
            min_chunk_size: chunk_size.min(MIN_CHUNK_SIZE),
            max_chunk_size: chunk_size.max(MAX_CHUNK_SIZE),
            adaptive_chunk_size: false,
            ..Self::default()
        }
    }

    /// Reject combinations the sizing and backpressure logic cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size == 0 {
            bail!("min_chunk_size must be greater than zero");
        }
        if self.min_chunk_size > self.max_chunk_size {
            bail!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                self.min_chunk_size,
                self.max_chunk_size
            );
        }
        if !(self.min_chunk_size..=self.max_chunk_size).contains(&self.default_chunk_size) {
            bail!(
                "default_chunk_size ({}) must lie within [{}, {}]",
                self.default_chunk_size,
                self.min_chunk_size,
                self.max_chunk_size
            );
        }
        if self.low_water_mark >= self.high_water_mark {
            bail!(
                "low_water_mark ({}) must be below high_water_mark ({})",
                self.low_water_mark,
                self.high_water_mark
            );
        }
        Ok(())
    }
}

/// Rendezvous server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SIGNAL_HOST.to_string(),
            port: DEFAULT_SIGNAL_PORT,
        }
    }
}

/// Top-level configuration file layout.
///
/// ```toml
/// data_dir = "/var/lib/swaz"
///
/// [transfer]
/// default_chunk_size = 65536
///
/// [signal]
/// port = 9000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub transfer: TransferConfig,
    pub signal: SignalConfig,
}

impl AppConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.transfer.validate()?;
        Ok(config)
    }
}
