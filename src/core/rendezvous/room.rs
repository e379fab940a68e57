//! Room bookkeeping for the rendezvous server.
//!
//! Pure state: every operation returns the messages each affected member
//! must receive, and the server delivers them. Nothing here touches a
//! socket, so the pairing rules are testable in isolation.

use super::messages::ServerMessage;
use crate::core::config::ROOM_CAPACITY;
use crate::core::error::RendezvousError;
use std::collections::HashMap;
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Server-side identity of one WebSocket connection.
pub type PeerId = Uuid;

/// A validated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Accept only `[A-Za-z0-9-]+`.
    pub fn parse(raw: &str) -> Result<Self, RendezvousError> {
        let valid = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(RendezvousError::InvalidRoomId(raw.to_string()))
        }
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: ServerMessage,
}

impl Outbound {
    fn new(to: PeerId, message: ServerMessage) -> Self {
        Self { to, message }
    }
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Members in join order; the first is the initiator.
    rooms: HashMap<RoomId, Vec<PeerId>>,
    membership: HashMap<PeerId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `requested` (or a fresh room when `None`).
    ///
    /// A peer already in another room leaves it first. A full room is
    /// rejected before anything changes.
    pub fn join(
        &mut self,
        peer: PeerId,
        requested: Option<&str>,
    ) -> Result<Vec<Outbound>, RendezvousError> {
        let room_id = match requested {
            Some(raw) => RoomId::parse(raw)?,
            None => RoomId::generate(),
        };

        let occupied = self
            .rooms
            .get(&room_id)
            .map(|members| members.iter().filter(|m| **m != peer).count())
            .unwrap_or(0);
        if occupied >= ROOM_CAPACITY {
            return Err(RendezvousError::RoomFull);
        }

        let mut out = self.leave(peer);

        let members = self.rooms.entry(room_id.clone()).or_default();
        members.push(peer);
        self.membership.insert(peer, room_id.clone());
        info!(event = "room_joined", room = %room_id, %peer, size = members.len());

        out.push(Outbound::new(
            peer,
            ServerMessage::RoomJoined {
                room_id: room_id.to_string(),
            },
        ));
        if members.len() == ROOM_CAPACITY {
            // The earlier member starts the exchange.
            let initiator = members[0];
            out.push(Outbound::new(
                initiator,
                ServerMessage::PeerJoined { initiator: true },
            ));
            out.push(Outbound::new(
                peer,
                ServerMessage::PeerJoined { initiator: false },
            ));
            info!(event = "room_full", room = %room_id);
        }
        Ok(out)
    }

    /// The other member of `peer`'s room, if one has joined yet.
    pub fn relay_target(&self, peer: PeerId) -> Result<Option<PeerId>, RendezvousError> {
        let room_id = self
            .membership
            .get(&peer)
            .ok_or(RendezvousError::NotInRoom)?;
        Ok(self
            .rooms
            .get(room_id)
            .and_then(|members| members.iter().copied().find(|m| *m != peer)))
    }

    /// Remove `peer` from its room. Remaining members are told; empty rooms go away.
    pub fn leave(&mut self, peer: PeerId) -> Vec<Outbound> {
        let Some(room_id) = self.membership.remove(&peer) else {
            return Vec::new();
        };
        let Some(members) = self.rooms.get_mut(&room_id) else {
            return Vec::new();
        };
        members.retain(|m| *m != peer);
        info!(event = "room_left", room = %room_id, %peer, size = members.len());

        let out = members
            .iter()
            .map(|m| Outbound::new(*m, ServerMessage::PeerLeft))
            .collect();
        if members.is_empty() {
            self.rooms.remove(&room_id);
            info!(event = "room_deleted", room = %room_id);
        }
        out
    }

    pub fn room_of(&self, peer: PeerId) -> Option<&RoomId> {
        self.membership.get(&peer)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
