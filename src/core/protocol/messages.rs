//! Control messages exchanged next to the binary chunk frames.
//!
//! Every message is a text frame of the form
//! `{"type": "<kebab-case kind>", "payload": {<camelCase fields>}}`.
//! Ciphertext never travels inside a control message; each `chunk-metadata`
//! is followed by exactly one binary frame carrying that chunk.

use crate::core::error::TransferError;
use serde::{Deserialize, Serialize};

/// Closed set of control messages. Decoding rejects unknown kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ControlMessage {
    FileMetadata(FileMetadata),
    ChunkMetadata(ChunkMetadata),
    TransferComplete(TransferComplete),
    RequestChunks(RequestChunks),
    FileReceivedAck(FileReceivedAck),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub total_chunks: u32,
    pub full_file_checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub file_id: String,
    pub chunk_index: u32,
    /// Plaintext length of the chunk.
    pub size: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    pub file_id: String,
    /// Number of chunks actually emitted. Absent from peers that never resize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestChunks {
    pub file_id: String,
    pub indexes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReceivedAck {
    pub file_id: String,
}

impl ControlMessage {
    pub fn encode(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The file every control message refers to.
    pub fn file_id(&self) -> &str {
        match self {
            Self::FileMetadata(m) => &m.file_id,
            Self::ChunkMetadata(m) => &m.file_id,
            Self::TransferComplete(m) => &m.file_id,
            Self::RequestChunks(m) => &m.file_id,
            Self::FileReceivedAck(m) => &m.file_id,
        }
    }

    /// Wire name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileMetadata(_) => "file-metadata",
            Self::ChunkMetadata(_) => "chunk-metadata",
            Self::TransferComplete(_) => "transfer-complete",
            Self::RequestChunks(_) => "request-chunks",
            Self::FileReceivedAck(_) => "file-received-ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn file_metadata_wire_shape() {
        let msg = ControlMessage::FileMetadata(FileMetadata {
            file_id: "a.txt-3-17".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size: 3,
            total_chunks: 1,
            full_file_checksum: "ab".into(),
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "file-metadata",
                "payload": {
                    "fileId": "a.txt-3-17",
                    "name": "a.txt",
                    "mimeType": "text/plain",
                    "size": 3,
                    "totalChunks": 1,
                    "fullFileChecksum": "ab"
                }
            })
        );
    }

    #[test]
    fn decodes_peer_request_chunks() {
        let text = r#"{"type":"request-chunks","payload":{"fileId":"f","indexes":[2,5]}}"#;
        let msg = ControlMessage::decode(text).unwrap();
        assert_eq!(
            msg,
            ControlMessage::RequestChunks(RequestChunks {
                file_id: "f".into(),
                indexes: vec![2, 5],
            })
        );
        assert_eq!(msg.kind(), "request-chunks");
        assert_eq!(msg.file_id(), "f");
    }

    #[test]
    fn transfer_complete_total_is_optional() {
        let bare = r#"{"type":"transfer-complete","payload":{"fileId":"f"}}"#;
        let msg = ControlMessage::decode(bare).unwrap();
        assert_eq!(
            msg,
            ControlMessage::TransferComplete(TransferComplete {
                file_id: "f".into(),
                total_chunks: None,
            })
        );
        assert_eq!(msg.encode().unwrap(), bare);

        let with_total = ControlMessage::TransferComplete(TransferComplete {
            file_id: "f".into(),
            total_chunks: Some(4),
        });
        assert!(with_total.encode().unwrap().contains("\"totalChunks\":4"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let text = r#"{"type":"key-rotation","payload":{"fileId":"f"}}"#;
        assert!(matches!(
            ControlMessage::decode(text),
            Err(TransferError::Serialization(_))
        ));
        assert!(ControlMessage::decode("not json").is_err());
    }
}
