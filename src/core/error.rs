//! Error taxonomy for the transfer engine and the rendezvous layer.
//!
//! Chunk-local failures (`Decryption`, `ChunkChecksumMismatch`) are absorbed
//! by the coordinator and recovered through retransmission. Everything else
//! is surfaced to the caller with a machine-readable [`ErrorCode`].

use serde::{Deserialize, Serialize};

/// Machine-readable failure codes carried by terminal statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    KeyGenerationFailed,
    KeyExchangeFailed,
    NotReady,
    EncryptionFailed,
    DecryptionFailed,
    ChunkChecksumMismatch,
    ChecksumMismatch,
    ChannelError,
    RoomFull,
    InvalidRoomId,
    IoError,
    ProtocolError,
}

/// Errors produced by the key exchange, cipher and transfer coordinator.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    #[error("session key not derived yet")]
    NotReady,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed")]
    Decryption,

    #[error("checksum mismatch for chunk {chunk_index} of {file_id}")]
    ChunkChecksumMismatch { file_id: String, chunk_index: u32 },

    #[error("final checksum mismatch for {file_name} ({file_id})")]
    WholeFileChecksumMismatch { file_id: String, file_name: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransferError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::KeyGeneration(_) => ErrorCode::KeyGenerationFailed,
            Self::KeyExchange(_) => ErrorCode::KeyExchangeFailed,
            Self::NotReady => ErrorCode::NotReady,
            Self::Encryption(_) => ErrorCode::EncryptionFailed,
            Self::Decryption => ErrorCode::DecryptionFailed,
            Self::ChunkChecksumMismatch { .. } => ErrorCode::ChunkChecksumMismatch,
            Self::WholeFileChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::Channel(_) | Self::ChannelClosed => ErrorCode::ChannelError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Serialization(_) => ErrorCode::ProtocolError,
        }
    }

    /// Whether the failure ends the whole session (as opposed to one chunk or one file).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::KeyGeneration(_)
                | Self::KeyExchange(_)
                | Self::NotReady
                | Self::Encryption(_)
                | Self::Channel(_)
                | Self::ChannelClosed
        )
    }
}

/// Errors produced by the rendezvous (room) layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    #[error("Room is full")]
    RoomFull,

    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl RendezvousError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomFull => ErrorCode::RoomFull,
            Self::InvalidRoomId(_) => ErrorCode::InvalidRoomId,
            Self::NotInRoom | Self::Malformed(_) => ErrorCode::ProtocolError,
        }
    }
}
