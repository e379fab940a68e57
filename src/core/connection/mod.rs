pub mod memory;
pub mod transport;
pub mod webrtc;

pub use transport::{ChannelState, ChannelTransport, Frame, TransportEvent};
