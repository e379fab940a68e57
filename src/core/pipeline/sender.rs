//! Sender-side file state: sources, span reading, chunk sealing.
//!
//! Each outgoing file is read lazily by byte span so a disk-backed file is
//! never loaded whole. Spans are recorded as they are emitted; a
//! retransmission of index `i` re-reads exactly the bytes first sent as `i`,
//! whatever the adaptive chunk size has become since.

use crate::core::config::{TransferConfig, HASH_READ_BUFFER};
use crate::core::error::TransferError;
use crate::core::pipeline::chunk::{planned_chunks, ChunkSizer, ChunkSpan};
use crate::core::protocol::messages::{ChunkMetadata, FileMetadata};
use crate::core::security::integrity::{self, FileDigest};
use crate::core::security::ChunkCipher;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use uuid::Uuid;

/// MIME type used when nothing better is known.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

// ── Sources ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum FileSource {
    Memory(Bytes),
    Disk(PathBuf),
}

/// A file queued for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    source: FileSource,
}

impl OutgoingFile {
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    /// Reference a file on disk. Size comes from metadata; bytes are read on demand.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )
            .into());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            mime_type: guess_mime_type(&name).to_string(),
            name,
            size: meta.len(),
            source: FileSource::Disk(path.to_path_buf()),
        })
    }

    pub(crate) async fn open(&self) -> Result<SourceReader, TransferError> {
        Ok(match &self.source {
            FileSource::Memory(bytes) => SourceReader::Memory(bytes.clone()),
            FileSource::Disk(path) => SourceReader::Disk(tokio::fs::File::open(path).await?),
        })
    }
}

/// Open handle onto a file's bytes.
pub(crate) enum SourceReader {
    Memory(Bytes),
    Disk(tokio::fs::File),
}

impl SourceReader {
    pub(crate) async fn read_span(&mut self, span: ChunkSpan) -> Result<Vec<u8>, TransferError> {
        match self {
            Self::Memory(bytes) => {
                let start = span.offset as usize;
                let end = start + span.len;
                bytes.get(start..end).map(|s| s.to_vec()).ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "span past end of in-memory file",
                    )
                    .into()
                })
            }
            Self::Disk(file) => {
                file.seek(SeekFrom::Start(span.offset)).await?;
                let mut buf = vec![0u8; span.len];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// Digest of the whole file, read in bounded pieces.
    pub(crate) async fn full_digest(&mut self, size: u64) -> Result<String, TransferError> {
        match self {
            Self::Memory(bytes) => Ok(integrity::digest(bytes)),
            Self::Disk(file) => {
                file.seek(SeekFrom::Start(0)).await?;
                let mut digest = FileDigest::new();
                let mut buf = vec![0u8; HASH_READ_BUFFER];
                let mut remaining = size;
                while remaining > 0 {
                    let want = (buf.len() as u64).min(remaining) as usize;
                    file.read_exact(&mut buf[..want]).await?;
                    digest.update(&buf[..want]);
                    remaining -= want as u64;
                }
                Ok(digest.finalize())
            }
        }
    }
}

// ── Per-file sending state ───────────────────────────────────────────────────

/// Immutable description of a file once streaming is about to begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Count announced in `file-metadata`, at the starting chunk size.
    pub total_chunks: u32,
    pub full_file_checksum: String,
}

impl FileRecord {
    pub fn to_metadata(&self) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            total_chunks: self.total_chunks,
            full_file_checksum: self.full_file_checksum.clone(),
        }
    }
}

/// Streaming state of the file currently owned by the sender.
pub(crate) struct OutgoingTransfer {
    pub record: FileRecord,
    reader: SourceReader,
    sizer: ChunkSizer,
    spans: Vec<ChunkSpan>,
    cursor: u64,
}

impl OutgoingTransfer {
    /// Open the source, digest it and fix the file's identity.
    pub async fn prepare(file: &OutgoingFile, config: &TransferConfig) -> Result<Self, TransferError> {
        let mut reader = file.open().await?;
        let full_file_checksum = reader.full_digest(file.size).await?;
        let record = FileRecord {
            file_id: new_file_id(&file.name, file.size),
            name: file.name.clone(),
            mime_type: if file.mime_type.is_empty() {
                FALLBACK_MIME_TYPE.to_string()
            } else {
                file.mime_type.clone()
            },
            size: file.size,
            total_chunks: planned_chunks(file.size, config.default_chunk_size),
            full_file_checksum,
        };
        Ok(Self {
            record,
            reader,
            sizer: ChunkSizer::new(config),
            spans: Vec::new(),
            cursor: 0,
        })
    }

    pub fn sizer(&self) -> &ChunkSizer {
        &self.sizer
    }

    pub fn sizer_mut(&mut self) -> &mut ChunkSizer {
        &mut self.sizer
    }

    /// Assign the next span at the current chunk size, or `None` once exhausted.
    pub fn next_span(&mut self) -> Option<(u32, ChunkSpan)> {
        if self.cursor >= self.record.size {
            return None;
        }
        let len = (self.sizer.current() as u64).min(self.record.size - self.cursor) as usize;
        let span = ChunkSpan {
            offset: self.cursor,
            len,
        };
        let index = self.spans.len() as u32;
        self.spans.push(span);
        self.cursor += len as u64;
        Some((index, span))
    }

    pub fn span(&self, index: u32) -> Option<ChunkSpan> {
        self.spans.get(index as usize).copied()
    }

    pub fn emitted(&self) -> u32 {
        self.spans.len() as u32
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.record.size
    }

    /// Emitted chunks plus those still needed at the current chunk size.
    pub fn estimated_total(&self) -> u32 {
        self.emitted() + planned_chunks(self.record.size - self.cursor, self.sizer.current())
    }

    /// Read, digest and encrypt chunk `index`.
    pub async fn seal(
        &mut self,
        cipher: &ChunkCipher,
        index: u32,
        span: ChunkSpan,
    ) -> Result<SealedChunk, TransferError> {
        let plaintext = self.reader.read_span(span).await?;
        seal_chunk(cipher, &self.record.file_id, index, &plaintext)
    }
}

/// A chunk ready for the wire: its announcement and its ciphertext frame.
pub(crate) struct SealedChunk {
    pub metadata: ChunkMetadata,
    pub ciphertext: Bytes,
}

pub(crate) fn seal_chunk(
    cipher: &ChunkCipher,
    file_id: &str,
    index: u32,
    plaintext: &[u8],
) -> Result<SealedChunk, TransferError> {
    let checksum = integrity::digest(plaintext);
    let ciphertext = cipher.encrypt(plaintext)?;
    Ok(SealedChunk {
        metadata: ChunkMetadata {
            file_id: file_id.to_string(),
            chunk_index: index,
            size: plaintext.len() as u32,
            checksum,
        },
        ciphertext: Bytes::from(ciphertext),
    })
}

/// `name-size-millis-xxxxxxxx`: unique per queued instance.
pub fn new_file_id(name: &str, size: u64) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{name}-{size}-{millis}-{}", &suffix[..8])
}

/// Best-effort MIME type from a file extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => FALLBACK_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    async fn spans_for(size: usize, config: &TransferConfig, grow: bool) -> Vec<ChunkSpan> {
        let file = OutgoingFile::from_bytes("f.bin", "", patterned(size));
        let mut t = OutgoingTransfer::prepare(&file, config).await.unwrap();
        let mut out = Vec::new();
        while let Some((i, span)) = t.next_span() {
            assert_eq!(i as usize, out.len());
            out.push(span);
            if grow {
                t.sizer_mut().record_clear(0);
            }
        }
        assert!(t.is_exhausted());
        out
    }

    #[tokio::test]
    async fn spans_cover_file_exactly() {
        let fixed = TransferConfig::fixed_chunk_size(DEFAULT_CHUNK_SIZE);
        let adaptive = TransferConfig::default();
        for size in [0usize, 1, DEFAULT_CHUNK_SIZE, 5 * DEFAULT_CHUNK_SIZE + 17] {
            for (config, grow) in [(&fixed, false), (&adaptive, true)] {
                let spans = spans_for(size, config, grow).await;
                let total: usize = spans.iter().map(|s| s.len).sum();
                assert_eq!(total, size);
                let mut expected_offset = 0u64;
                for s in &spans {
                    assert_eq!(s.offset, expected_offset);
                    assert!(s.len > 0 && s.len <= MAX_CHUNK_SIZE);
                    expected_offset += s.len as u64;
                }
            }
        }
        assert_eq!(spans_for(1_048_576, &fixed, false).await.len(), 16);
    }

    #[tokio::test]
    async fn prepare_fixes_identity_and_digest() {
        let data = patterned(1000);
        let file = OutgoingFile::from_bytes("a.txt", "", data.clone());
        let t = OutgoingTransfer::prepare(&file, &TransferConfig::default())
            .await
            .unwrap();
        assert!(t.record.file_id.starts_with("a.txt-1000-"));
        assert_eq!(t.record.mime_type, FALLBACK_MIME_TYPE);
        assert_eq!(t.record.total_chunks, 1);
        assert_eq!(t.record.full_file_checksum, integrity::digest(&data));

        let again = OutgoingTransfer::prepare(&file, &TransferConfig::default())
            .await
            .unwrap();
        assert_ne!(t.record.file_id, again.record.file_id);
    }

    #[tokio::test]
    async fn disk_source_reads_spans_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.PNG");
        let data = patterned(200_000);
        std::fs::write(&path, &data).unwrap();

        let file = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "photo.PNG");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.size, 200_000);

        let mut t = OutgoingTransfer::prepare(&file, &TransferConfig::default())
            .await
            .unwrap();
        assert_eq!(t.record.full_file_checksum, integrity::digest(&data));

        let (_, first) = t.next_span().unwrap();
        let (_, second) = t.next_span().unwrap();
        let bytes = t.reader.read_span(second).await.unwrap();
        assert_eq!(bytes, &data[first.len..first.len + second.len]);
    }

    #[tokio::test]
    async fn from_path_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OutgoingFile::from_path(dir.path()).await.is_err());
    }

    #[test]
    fn sealed_chunk_announces_plaintext_size_and_digest() {
        let (a, b) = crate::core::security::cipher::tests::paired_ciphers();
        let sealed = seal_chunk(&a, "fid", 3, b"hello").unwrap();
        assert_eq!(sealed.metadata.chunk_index, 3);
        assert_eq!(sealed.metadata.size, 5);
        assert_eq!(sealed.metadata.checksum, integrity::digest(b"hello"));
        assert_eq!(b.decrypt(&sealed.ciphertext).unwrap(), b"hello");
    }
}
