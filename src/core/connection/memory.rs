//! In-process channel pair.
//!
//! Each side owns an unbounded outbox and a pump task that moves frames
//! into the peer's bounded event queue in order. `buffered_amount` is the
//! number of bytes sitting in the outbox, so a slow consumer on the other
//! side produces real backpressure on the sender.
//!
//! A [`FaultPlan`] can drop or corrupt one binary frame in flight, which is
//! how retransmission is exercised without a network.

use super::transport::{ChannelState, ChannelTransport, Frame, TransportEvent};
use crate::core::error::TransferError;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Faults applied to binary frames travelling in one direction.
///
/// Indices count binary frames only, starting at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub drop_binary: Option<usize>,
    pub corrupt_binary: Option<usize>,
}

impl FaultPlan {
    pub fn drop_nth(n: usize) -> Self {
        Self {
            drop_binary: Some(n),
            ..Self::default()
        }
    }

    pub fn corrupt_nth(n: usize) -> Self {
        Self {
            corrupt_binary: Some(n),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferState {
    buffered: usize,
    closed: bool,
}

/// One end of an in-memory pair.
pub struct MemoryChannel {
    outbox: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    buffer: Arc<watch::Sender<BufferState>>,
    low_water: AtomicUsize,
    own_events: mpsc::Sender<TransportEvent>,
}

pub type Endpoint = (MemoryChannel, mpsc::Receiver<TransportEvent>);

/// Connected pair with no faults.
pub fn pair(capacity: usize) -> (Endpoint, Endpoint) {
    pair_with_faults(capacity, FaultPlan::default())
}

/// Connected pair; `a_to_b` applies to frames sent by the first endpoint.
///
/// Must be called inside a Tokio runtime.
pub fn pair_with_faults(capacity: usize, a_to_b: FaultPlan) -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();

    let a_buf = Arc::new(watch::channel(BufferState::default()).0);
    let b_buf = Arc::new(watch::channel(BufferState::default()).0);

    let a = MemoryChannel {
        outbox: Mutex::new(Some(a_out_tx)),
        buffer: a_buf,
        low_water: AtomicUsize::new(0),
        own_events: a_tx.clone(),
    };
    let b = MemoryChannel {
        outbox: Mutex::new(Some(b_out_tx)),
        buffer: b_buf,
        low_water: AtomicUsize::new(0),
        own_events: b_tx.clone(),
    };

    let _ = a_tx.try_send(TransportEvent::StateChange(ChannelState::Open));
    let _ = b_tx.try_send(TransportEvent::StateChange(ChannelState::Open));

    tokio::spawn(pump(
        "a->b",
        a_out_rx,
        b_tx,
        BufferHandle(a.buffer.clone()),
        BufferHandle(b.buffer.clone()),
        a_to_b,
    ));
    tokio::spawn(pump(
        "b->a",
        b_out_rx,
        a_tx,
        BufferHandle(b.buffer.clone()),
        BufferHandle(a.buffer.clone()),
        FaultPlan::default(),
    ));

    ((a, a_rx), (b, b_rx))
}

/// Shared handle onto a side's buffer state, usable from the pump task.
#[derive(Clone)]
struct BufferHandle(Arc<watch::Sender<BufferState>>);

async fn pump(
    direction: &'static str,
    mut outbox: mpsc::UnboundedReceiver<Frame>,
    peer_inbox: mpsc::Sender<TransportEvent>,
    own_buffer: BufferHandle,
    peer_buffer: BufferHandle,
    faults: FaultPlan,
) {
    let mut binary_seen = 0usize;

    while let Some(frame) = outbox.recv().await {
        let len = frame.len();
        let frame = match frame {
            Frame::Binary(data) => {
                let n = binary_seen;
                binary_seen += 1;
                if faults.drop_binary == Some(n) {
                    debug!(event = "fault_drop", direction, frame = n);
                    own_buffer.release(len);
                    continue;
                }
                if faults.corrupt_binary == Some(n) {
                    debug!(event = "fault_corrupt", direction, frame = n);
                    Frame::Binary(flip_middle_byte(data))
                } else {
                    Frame::Binary(data)
                }
            }
            text => text,
        };

        let delivered = peer_inbox.send(TransportEvent::Message(frame)).await;
        own_buffer.release(len);
        if delivered.is_err() {
            break;
        }
    }

    // Outbox closed (local close or drop) or the peer went away.
    own_buffer.mark_closed();
    peer_buffer.mark_closed();
    let _ = peer_inbox
        .send(TransportEvent::StateChange(ChannelState::Closed))
        .await;
}

fn flip_middle_byte(data: Bytes) -> Bytes {
    let mut bytes = data.to_vec();
    if let Some(b) = bytes.get_mut(data.len() / 2) {
        *b ^= 0x01;
    }
    Bytes::from(bytes)
}

impl BufferHandle {
    fn release(&self, len: usize) {
        self.0
            .send_modify(|s| s.buffered = s.buffered.saturating_sub(len));
    }

    fn mark_closed(&self) {
        self.0.send_modify(|s| s.closed = true);
    }
}

impl MemoryChannel {
    fn enqueue(&self, frame: Frame) -> Result<(), TransferError> {
        if self.buffer.borrow().closed {
            return Err(TransferError::ChannelClosed);
        }
        let guard = self
            .outbox
            .lock()
            .map_err(|_| TransferError::Channel("outbox lock poisoned".into()))?;
        let outbox = guard.as_ref().ok_or(TransferError::ChannelClosed)?;
        let len = frame.len();
        self.buffer.send_modify(|s| s.buffered += len);
        outbox.send(frame).map_err(|_| {
            self.buffer
                .send_modify(|s| s.buffered = s.buffered.saturating_sub(len));
            TransferError::ChannelClosed
        })
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.borrow().closed
    }
}

impl ChannelTransport for MemoryChannel {
    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        self.enqueue(Frame::Text(text))
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError> {
        self.enqueue(Frame::Binary(data))
    }

    async fn buffered_amount(&self) -> usize {
        self.buffer.borrow().buffered
    }

    async fn set_low_water_mark(&self, bytes: usize) {
        self.low_water.store(bytes, Ordering::Relaxed);
    }

    async fn buffer_drained(&self) -> Result<(), TransferError> {
        let low = self.low_water.load(Ordering::Relaxed);
        let mut rx = self.buffer.subscribe();
        let closed = rx
            .wait_for(|s| s.closed || s.buffered <= low)
            .await
            .map_err(|_| TransferError::ChannelClosed)?
            .closed;
        if closed {
            Err(TransferError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        let taken = match self.outbox.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if taken.is_some() {
            self.buffer.send_modify(|s| s.closed = true);
            let _ = self
                .own_events
                .send(TransportEvent::StateChange(ChannelState::Closed))
                .await;
        }
    }
}
