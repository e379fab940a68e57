//! Rendezvous: pairs two peers in a room and relays their session setup.

pub mod messages;
pub mod room;
pub mod server;

pub use messages::{ClientMessage, RelayKind, ServerMessage};
pub use room::{RoomId, RoomRegistry};
pub use server::SignalServer;
