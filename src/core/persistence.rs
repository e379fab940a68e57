//! Local stores used by the engine's caller: transfer history and the single
//! pending scheduled job. Both are JSON files in the data directory,
//! replaced atomically on every write.

use crate::core::config::{HISTORY_FILE, HISTORY_LIMIT, SCHEDULED_JOB_FILE};
use crate::core::pipeline::OutgoingFile;
use crate::core::rendezvous::RoomId;
use crate::utils::atomic_write::atomic_write;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

// ── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Sent,
    Received,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub date: DateTime<Utc>,
    pub status: HistoryStatus,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Bytes per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_speed: Option<f64>,
}

/// An entry before the store assigns its id and date.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub file_name: String,
    pub file_size: u64,
    pub status: HistoryStatus,
    pub mime_type: String,
    pub duration_secs: Option<f64>,
    pub average_speed: Option<f64>,
}

impl NewHistoryEntry {
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
        status: HistoryStatus,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            status,
            mime_type: mime_type.into(),
            duration_secs: None,
            average_speed: None,
        }
    }

    /// Entry for a transfer that began at `started`, with throughput filled in.
    pub fn finished(
        file_name: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
        status: HistoryStatus,
        started: Instant,
    ) -> Self {
        let secs = started.elapsed().as_secs_f64();
        let mut entry = Self::new(file_name, file_size, mime_type, status);
        entry.duration_secs = Some(secs);
        entry.average_speed = (secs > 0.0).then(|| file_size as f64 / secs);
        entry
    }
}

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(HISTORY_FILE),
        }
    }

    /// Newest first. A missing file is an empty history.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn append(&self, new: NewHistoryEntry) -> Result<HistoryEntry> {
        let date = Utc::now();
        let entry = HistoryEntry {
            id: format!("{}-{}", date.timestamp_millis(), new.file_name),
            file_name: new.file_name,
            file_size: new.file_size,
            date,
            status: new.status,
            mime_type: new.mime_type,
            duration_secs: new.duration_secs,
            average_speed: new.average_speed,
        };

        let mut entries = self.entries()?;
        entries.insert(0, entry.clone());
        entries.truncate(HISTORY_LIMIT);
        write_json(&self.path, &entries)?;

        info!(event = "history_append", id = %entry.id, status = ?entry.status);
        Ok(entry)
    }

    pub fn clear(&self) -> Result<()> {
        write_json(&self.path, &Vec::<HistoryEntry>::new())?;
        info!(event = "history_cleared");
        Ok(())
    }
}

// ── Scheduled job ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<&OutgoingFile> for ScheduledFile {
    fn from(file: &OutgoingFile) -> Self {
        Self {
            name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            last_modified: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub room_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub file_metadata: Vec<ScheduledFile>,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_time
    }
}

/// Holds at most one job; saving replaces it.
pub struct ScheduledJobStore {
    path: PathBuf,
}

impl ScheduledJobStore {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SCHEDULED_JOB_FILE),
        }
    }

    pub fn save(&self, job: &ScheduledJob) -> Result<()> {
        RoomId::parse(&job.room_id)?;
        write_json(&self.path, job)?;
        info!(
            event = "scheduled_job_saved",
            room = %job.room_id,
            at = %job.scheduled_time,
            files = job.file_metadata.len(),
        );
        Ok(())
    }

    pub fn get(&self) -> Result<Option<ScheduledJob>> {
        read_json(&self.path)
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(event = "scheduled_job_cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("corrupt store file {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &content)
}
