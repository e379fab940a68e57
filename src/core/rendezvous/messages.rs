//! Signaling wire messages: `{"type": "...", "payload": {...}}` over WebSocket text frames.

use crate::core::error::RendezvousError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types the server only forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
    PublicKey,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::PublicKey => "public-key",
        }
    }
}

/// What a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `roomId` absent or empty asks the server to allocate one.
    JoinRoom { room_id: Option<String> },
    /// Forwarded verbatim to the other room member.
    Relay(RelayKind),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, RendezvousError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RendezvousError::Malformed(e.to_string()))?;

        let relay = match envelope.kind.as_str() {
            "join-room" => {
                let room_id = match envelope.payload.get("roomId") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) if s.is_empty() => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => return Err(RendezvousError::InvalidRoomId(other.to_string())),
                };
                return Ok(Self::JoinRoom { room_id });
            }
            "offer" => RelayKind::Offer,
            "answer" => RelayKind::Answer,
            "ice-candidate" => RelayKind::IceCandidate,
            "public-key" => RelayKind::PublicKey,
            other => {
                return Err(RendezvousError::Malformed(format!(
                    "unknown message type {other:?}"
                )))
            }
        };
        Ok(Self::Relay(relay))
    }
}

/// What the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: String },
    PeerJoined { initiator: bool },
    PeerLeft,
    Error { message: String },
}

impl ServerMessage {
    pub fn error(err: &RendezvousError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_variants() {
        let join = |v: Value| ClientMessage::parse(&v.to_string());
        assert_eq!(
            join(json!({"type": "join-room", "payload": {"roomId": "abc"}})).unwrap(),
            ClientMessage::JoinRoom {
                room_id: Some("abc".into())
            }
        );
        assert_eq!(
            join(json!({"type": "join-room"})).unwrap(),
            ClientMessage::JoinRoom { room_id: None }
        );
        assert_eq!(
            join(json!({"type": "join-room", "payload": {"roomId": ""}})).unwrap(),
            ClientMessage::JoinRoom { room_id: None }
        );
        assert!(matches!(
            join(json!({"type": "join-room", "payload": {"roomId": 7}})),
            Err(RendezvousError::InvalidRoomId(_))
        ));
    }

    #[test]
    fn parses_relays_and_rejects_unknown() {
        let msg = json!({"type": "ice-candidate", "payload": {"candidate": "x"}}).to_string();
        assert_eq!(
            ClientMessage::parse(&msg).unwrap(),
            ClientMessage::Relay(RelayKind::IceCandidate)
        );
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"chat"}"#),
            Err(RendezvousError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(RendezvousError::Malformed(_))
        ));
    }

    #[test]
    fn server_messages_match_wire_shape() {
        let v: Value = serde_json::from_str(
            &ServerMessage::RoomJoined {
                room_id: "r1".into(),
            }
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(v, json!({"type": "room-joined", "payload": {"roomId": "r1"}}));

        let v: Value = serde_json::from_str(&ServerMessage::PeerLeft.encode().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "peer-left"}));

        let v: Value =
            serde_json::from_str(&ServerMessage::error(&RendezvousError::RoomFull).encode().unwrap())
                .unwrap();
        assert_eq!(v, json!({"type": "error", "payload": {"message": "Room is full"}}));
    }
}
