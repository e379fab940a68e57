//! Adapter from a webrtc-rs data channel to [`ChannelTransport`].
//!
//! Data channel callbacks are forwarded onto a bounded event queue; a full
//! queue stalls the SCTP reader, which is the receiver's backpressure.
//! The "buffered amount low" callback drives [`ChannelTransport::buffer_drained`].

use super::transport::{ChannelState, ChannelTransport, Frame, TransportEvent};
use crate::core::error::TransferError;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    drained: Arc<Notify>,
    low_water: AtomicUsize,
}

impl WebRtcChannel {
    /// Attach handlers to `dc` and return the transport plus its event queue.
    pub async fn attach(
        dc: Arc<RTCDataChannel>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let drained = Arc::new(Notify::new());

        if dc.ready_state() == RTCDataChannelState::Open {
            let _ = tx.try_send(TransportEvent::StateChange(ChannelState::Open));
        }

        let open_tx = tx.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                let _ = open_tx
                    .send(TransportEvent::StateChange(ChannelState::Open))
                    .await;
            })
        }));

        let label = dc.label().to_string();
        let close_tx = tx.clone();
        let close_notify = drained.clone();
        dc.on_close(Box::new(move || {
            let label = label.clone();
            let tx = close_tx.clone();
            let notify = close_notify.clone();
            Box::pin(async move {
                warn!(event = "dc_closed", channel = %label, "DataChannel closed by transport");
                notify.notify_waiters();
                let _ = tx.send(TransportEvent::StateChange(ChannelState::Closed)).await;
            })
        }));

        let label = dc.label().to_string();
        let err_tx = tx.clone();
        dc.on_error(Box::new(move |err| {
            let label = label.clone();
            let tx = err_tx.clone();
            Box::pin(async move {
                error!(event = "dc_error", channel = %label, %err, "DataChannel transport error");
                let _ = tx.send(TransportEvent::Error(err.to_string())).await;
            })
        }));

        let msg_tx = tx;
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = msg_tx.clone();
            Box::pin(async move {
                let frame = if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => Frame::Text(text),
                        Err(e) => {
                            warn!(event = "dc_invalid_text", %e, "Dropping non UTF-8 text frame");
                            return;
                        }
                    }
                } else {
                    Frame::Binary(msg.data)
                };
                let _ = tx.send(TransportEvent::Message(frame)).await;
            })
        }));

        let low_notify = drained.clone();
        dc.on_buffered_amount_low(Box::new(move || {
            let notify = low_notify.clone();
            Box::pin(async move {
                notify.notify_waiters();
            })
        }))
        .await;

        (
            Self {
                dc,
                drained,
                low_water: AtomicUsize::new(0),
            },
            rx,
        )
    }

    fn assert_open(&self) -> Result<(), TransferError> {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => Ok(()),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed => {
                Err(TransferError::ChannelClosed)
            }
            state => Err(TransferError::Channel(format!(
                "data channel '{}' not open: {state}",
                self.dc.label()
            ))),
        }
    }
}

impl ChannelTransport for WebRtcChannel {
    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        self.assert_open()?;
        self.dc
            .send_text(text)
            .await
            .map_err(|e| TransferError::Channel(e.to_string()))?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError> {
        self.assert_open()?;
        self.dc
            .send(&data)
            .await
            .map_err(|e| TransferError::Channel(e.to_string()))?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn set_low_water_mark(&self, bytes: usize) {
        self.low_water.store(bytes, Ordering::Relaxed);
        self.dc.set_buffered_amount_low_threshold(bytes).await;
    }

    async fn buffer_drained(&self) -> Result<(), TransferError> {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.assert_open()?;
            let buffered = self.dc.buffered_amount().await;
            if buffered <= self.low_water.load(Ordering::Relaxed) {
                return Ok(());
            }
            debug!(event = "dc_backpressure_wait", channel = %self.dc.label(), buffered);
            notified.await;
        }
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            warn!(event = "dc_close_failure", channel = %self.dc.label(), %e);
        }
        self.drained.notify_waiters();
    }
}
