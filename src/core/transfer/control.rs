//! Caller-side control of a running coordinator.
//!
//! Commands are applied by the coordinator between chunks, in the order
//! they were issued. Pause state is a watch value so a paused sender
//! suspends without polling and wakes exactly when resumed.

use crate::core::error::TransferError;
use crate::core::pipeline::OutgoingFile;
use crate::utils::sos::SignalOfStop;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug)]
pub(crate) enum Command {
    Enqueue(Vec<OutgoingFile>),
    CancelCurrent,
}

/// Cloneable handle onto one session's coordinator.
#[derive(Clone)]
pub struct TransferHandle {
    commands: mpsc::UnboundedSender<Command>,
    paused: Arc<watch::Sender<bool>>,
    stop: SignalOfStop,
}

impl TransferHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        paused: Arc<watch::Sender<bool>>,
        stop: SignalOfStop,
    ) -> Self {
        Self {
            commands,
            paused,
            stop,
        }
    }

    /// Append files to the outbound queue; streaming starts if idle.
    pub fn send_files(&self, files: Vec<OutgoingFile>) -> Result<(), TransferError> {
        self.commands
            .send(Command::Enqueue(files))
            .map_err(|_| TransferError::ChannelClosed)
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// No-op unless paused.
    pub fn resume(&self) {
        self.paused.send_if_modified(|paused| {
            let was = *paused;
            *paused = false;
            was
        });
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Abort the file being streamed (or awaiting its ack) and move on.
    pub fn cancel_current(&self) -> Result<(), TransferError> {
        self.commands
            .send(Command::CancelCurrent)
            .map_err(|_| TransferError::ChannelClosed)
    }

    /// Tear the session down: the channel is closed and the coordinator exits.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}
