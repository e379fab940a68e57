//! Wire protocol for the data channel: typed control messages.

pub mod messages;

pub use messages::ControlMessage;
