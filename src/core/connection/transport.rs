//! The channel contract the transfer coordinator is written against.
//!
//! A transport is a reliable, ordered, message-oriented channel carrying two
//! kinds of frames: text (control messages) and binary (ciphertext). It
//! reports how many bytes are queued but not yet handed to the network and
//! can signal when that backlog falls below a low water mark.
//!
//! Inbound traffic and lifecycle changes are delivered as [`TransportEvent`]s
//! on a bounded queue handed out when the transport is created.

use crate::core::error::TransferError;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One message as delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a transport reports to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChange(ChannelState),
    Message(Frame),
    Error(String),
}

/// Outbound half of a peer channel.
///
/// Exactly one coordinator drives a given transport; implementations need
/// not serialize concurrent writers.
pub trait ChannelTransport: Send + Sync + 'static {
    fn send_text(&self, text: String) -> impl Future<Output = Result<(), TransferError>> + Send;

    fn send_binary(&self, data: Bytes) -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Bytes accepted by `send_*` but not yet flushed.
    fn buffered_amount(&self) -> impl Future<Output = usize> + Send;

    /// Threshold at which [`ChannelTransport::buffer_drained`] resolves.
    fn set_low_water_mark(&self, bytes: usize) -> impl Future<Output = ()> + Send;

    /// Resolve once the backlog is at or below the low water mark.
    /// Fails with `ChannelClosed` if the channel closes first.
    fn buffer_drained(&self) -> impl Future<Output = Result<(), TransferError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}
