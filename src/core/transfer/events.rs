//! What the coordinator reports to its caller.

use crate::core::connection::ChannelState;
use crate::core::error::{ErrorCode, TransferError};
use bytes::Bytes;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Derived progress view. Never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub file_id: String,
    pub file_name: String,
    pub direction: Direction,
    pub transferred_chunks: u32,
    pub total_chunks: u32,
    pub percentage: f64,
}

impl ProgressSnapshot {
    pub fn new(
        file_id: &str,
        file_name: &str,
        direction: Direction,
        transferred_chunks: u32,
        total_chunks: u32,
    ) -> Self {
        let percentage = if total_chunks == 0 {
            100.0
        } else {
            (transferred_chunks as f64 / total_chunks as f64 * 100.0).min(100.0)
        };
        Self {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            direction,
            transferred_chunks,
            total_chunks,
            percentage,
        }
    }
}

/// Identifiers that let the caller render an actionable message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureContext {
    pub file_name: Option<String>,
    pub file_id: Option<String>,
    pub chunk_index: Option<u32>,
}

impl FailureContext {
    pub fn file(file_id: &str, file_name: &str) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            file_id: Some(file_id.to_string()),
            chunk_index: None,
        }
    }

    pub fn with_chunk(mut self, index: u32) -> Self {
        self.chunk_index = Some(index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub code: ErrorCode,
    pub message: String,
    pub context: FailureContext,
}

impl TransferFailure {
    pub fn from_error(err: &TransferError, context: FailureContext) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum TransferStatus {
    Info(String),
    Success(String),
    Error(TransferFailure),
}

/// A fully verified incoming file.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl ReceivedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Write the file under `dir` using a sanitized name. Returns the final path.
    pub async fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize_file_name(&self.name));
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }
}

/// Reduce a peer-supplied name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let last = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .last()
        .unwrap_or_default();
    // Backslashes are not separators on Unix but are on the sender's side.
    let last = last.rsplit('\\').next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        "received_file".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Status(TransferStatus),
    Progress(ProgressSnapshot),
    FileSent { file_id: String, name: String },
    FileReceived(ReceivedFile),
    /// The outbound queue drained and every file was acknowledged.
    AllSent,
    FileCancelled { file_id: String, name: String },
    /// Incoming: indices requested from the peer. Outgoing: indices resent.
    Retransmit {
        file_id: String,
        direction: Direction,
        indexes: Vec<u32>,
    },
    ChannelState(ChannelState),
}

/// Forward `event` to the caller; no-op once the receiver is gone.
#[inline]
pub(crate) fn notify_app(tx: &mpsc::UnboundedSender<TransferEvent>, event: TransferEvent) {
    let _ = tx.send(event);
}
