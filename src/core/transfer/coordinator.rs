//! The transfer protocol state machine.
//!
//! One coordinator owns one transport for the life of a session and runs
//! both directions through a single loop:
//!
//! ```text
//! sender:   Idle ─► Streaming(file) ─► AwaitingAck(file) ─► Idle | AllSent
//!                        ▲                  │ request-chunks
//!                        └── resend spans ◄─┘
//!
//! receiver: file-metadata ─► chunk-metadata + binary frame ─► ...
//!           transfer-complete ─► request-chunks (holes) | verify ─► ack
//! ```
//!
//! Suspension points: the pause gate (a watch value, no polling), the
//! backpressure wait on the transport's drain signal, and each send.
//! Commands, pause changes and inbound frames are handled between chunks,
//! never in the middle of a `chunk-metadata` + ciphertext pair.

use super::control::{Command, TransferHandle};
use super::events::{
    notify_app, Direction, FailureContext, ProgressSnapshot, ReceivedFile, TransferEvent,
    TransferFailure, TransferStatus,
};
use crate::core::config::TransferConfig;
use crate::core::connection::{ChannelState, ChannelTransport, Frame, TransportEvent};
use crate::core::error::TransferError;
use crate::core::pipeline::chunk::{Placement, Pressure};
use crate::core::pipeline::receiver::{Completion, ReceivingFile};
use crate::core::pipeline::sender::{OutgoingTransfer, SealedChunk};
use crate::core::pipeline::OutgoingFile;
use crate::core::protocol::messages::{
    ChunkMetadata, ControlMessage, FileMetadata, FileReceivedAck, RequestChunks, TransferComplete,
};
use crate::core::security::ChunkCipher;
use crate::utils::sos::SignalOfStop;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Drives one session. Build with [`TransferCoordinator::new`], then `run()`.
pub struct TransferCoordinator<T: ChannelTransport> {
    core: Core<T>,
    inputs: Inputs,
}

struct Inputs {
    transport_events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    paused: watch::Receiver<bool>,
    stop: SignalOfStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    AwaitingAck,
}

struct Outgoing {
    transfer: OutgoingTransfer,
    phase: Phase,
}

/// Result of waiting for room in the channel before a chunk.
#[derive(Debug, Clone, Copy)]
enum Capacity {
    Clear(usize),
    Drained,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Closed,
}

struct Core<T: ChannelTransport> {
    transport: T,
    cipher: ChunkCipher,
    config: TransferConfig,
    app_tx: mpsc::UnboundedSender<TransferEvent>,
    // Held so the pause watch never reports a closed sender.
    _paused_tx: Arc<watch::Sender<bool>>,

    queue: VecDeque<OutgoingFile>,
    outgoing: Option<Outgoing>,

    incoming: HashMap<String, ReceivingFile>,
    awaiting_payload: Option<ChunkMetadata>,

    fault_context: Option<FailureContext>,
}

impl<T: ChannelTransport> TransferCoordinator<T> {
    pub fn new(
        transport: T,
        transport_events: mpsc::Receiver<TransportEvent>,
        cipher: ChunkCipher,
        config: TransferConfig,
    ) -> (Self, TransferHandle, mpsc::UnboundedReceiver<TransferEvent>) {
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (paused_tx, paused_rx) = watch::channel(false);
        let paused_tx = Arc::new(paused_tx);
        let stop = SignalOfStop::new();

        let handle = TransferHandle::new(cmd_tx, paused_tx.clone(), stop.clone());
        let coordinator = Self {
            core: Core {
                transport,
                cipher,
                config,
                app_tx,
                _paused_tx: paused_tx,
                queue: VecDeque::new(),
                outgoing: None,
                incoming: HashMap::new(),
                awaiting_payload: None,
                fault_context: None,
            },
            inputs: Inputs {
                transport_events,
                commands: cmd_rx,
                paused: paused_rx,
                stop,
            },
        };
        (coordinator, handle, app_rx)
    }

    /// Run until shutdown, a clean channel close, or a session-fatal error.
    ///
    /// Every exit path closes the transport and drops all per-file state.
    pub async fn run(self) -> Result<(), TransferError> {
        let Self {
            mut core,
            mut inputs,
        } = self;

        core.transport
            .set_low_water_mark(core.config.low_water_mark)
            .await;

        let result = core.drive(&mut inputs).await;
        if let Err(e) = &result {
            let context = core
                .fault_context
                .take()
                .unwrap_or_else(|| core.in_flight_context());
            error!(event = "session_aborted", code = ?e.code(), error = %e, "Transfer session aborted");
            core.emit(TransferEvent::Status(TransferStatus::Error(
                TransferFailure::from_error(e, context),
            )));
        }
        core.teardown().await;
        result
    }
}

impl<T: ChannelTransport> Core<T> {
    async fn drive(&mut self, inputs: &mut Inputs) -> Result<(), TransferError> {
        let mut commands_open = true;

        loop {
            self.advance_queue().await?;

            let can_send = self.is_streaming() && !*inputs.paused.borrow();

            tokio::select! {
                biased;

                _ = inputs.stop.wait() => {
                    info!(event = "session_shutdown", "Transfer session shut down by caller");
                    return Ok(());
                }

                event = inputs.transport_events.recv() => {
                    let flow = match event {
                        Some(event) => self.on_transport_event(event).await?,
                        None => self.on_channel_closed()?,
                    };
                    if flow == Flow::Closed {
                        return Ok(());
                    }
                }

                command = inputs.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => commands_open = false,
                },

                changed = inputs.paused.changed() => {
                    if changed.is_ok() {
                        let paused = *inputs.paused.borrow_and_update();
                        let (name, text) = if paused {
                            ("transfer_paused", "Transfer paused")
                        } else {
                            ("transfer_resumed", "Transfer resumed")
                        };
                        info!(event = name);
                        self.emit(TransferEvent::Status(TransferStatus::Info(text.into())));
                    }
                }

                capacity = self.capacity(), if can_send => {
                    self.send_next_chunk(capacity?).await?;
                    // Let the transport and the peer run between chunks.
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn emit(&self, event: TransferEvent) {
        notify_app(&self.app_tx, event);
    }

    fn is_streaming(&self) -> bool {
        matches!(&self.outgoing, Some(o) if o.phase == Phase::Streaming)
    }

    fn has_in_flight(&self) -> bool {
        self.outgoing.is_some() || !self.queue.is_empty() || !self.incoming.is_empty()
    }

    fn in_flight_context(&self) -> FailureContext {
        if let Some(out) = &self.outgoing {
            return FailureContext::file(&out.transfer.record.file_id, &out.transfer.record.name);
        }
        self.incoming
            .values()
            .next()
            .map(|f| FailureContext::file(&f.metadata.file_id, &f.metadata.name))
            .unwrap_or_default()
    }

    async fn teardown(&mut self) {
        self.transport.close().await;
        self.awaiting_payload = None;
        self.incoming.clear();
        self.outgoing = None;
        self.queue.clear();
        debug!(event = "session_teardown");
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(files) => {
                info!(event = "files_queued", count = files.len(), queued = self.queue.len());
                self.queue.extend(files);
            }
            Command::CancelCurrent => match self.outgoing.take() {
                Some(out) => {
                    let sent_chunks = out.transfer.emitted();
                    let record = out.transfer.record;
                    info!(
                        event = "file_cancelled",
                        file_id = %record.file_id,
                        name = %record.name,
                        sent_chunks,
                    );
                    self.emit(TransferEvent::FileCancelled {
                        file_id: record.file_id,
                        name: record.name,
                    });
                }
                None => debug!(event = "cancel_ignored", "No outgoing file to cancel"),
            },
        }
    }

    // ── Sender ───────────────────────────────────────────────────────────────

    /// Start the next queued file when idle; close out a fully streamed file.
    async fn advance_queue(&mut self) -> Result<(), TransferError> {
        loop {
            match &mut self.outgoing {
                Some(out) if out.phase == Phase::Streaming && out.transfer.is_exhausted() => {
                    let complete = ControlMessage::TransferComplete(TransferComplete {
                        file_id: out.transfer.record.file_id.clone(),
                        total_chunks: Some(out.transfer.emitted()),
                    });
                    send_control(&self.transport, &complete).await?;
                    out.phase = Phase::AwaitingAck;
                    info!(
                        event = "file_stream_done",
                        file_id = %out.transfer.record.file_id,
                        chunks = out.transfer.emitted(),
                        "Awaiting receiver acknowledgement"
                    );
                    return Ok(());
                }
                Some(_) => return Ok(()),
                None => {}
            }

            let Some(file) = self.queue.pop_front() else {
                return Ok(());
            };

            let transfer = match OutgoingTransfer::prepare(&file, &self.config).await {
                Ok(t) => t,
                Err(e) => {
                    error!(event = "file_prepare_failure", name = %file.name, error = %e);
                    let context = FailureContext {
                        file_name: Some(file.name.clone()),
                        ..FailureContext::default()
                    };
                    self.emit(TransferEvent::Status(TransferStatus::Error(
                        TransferFailure::from_error(&e, context),
                    )));
                    continue;
                }
            };

            let record = &transfer.record;
            info!(
                event = "file_send_start",
                file_id = %record.file_id,
                name = %record.name,
                size = record.size,
                total_chunks = record.total_chunks,
            );
            send_control(
                &self.transport,
                &ControlMessage::FileMetadata(record.to_metadata()),
            )
            .await?;
            self.emit(TransferEvent::Status(TransferStatus::Info(format!(
                "Sending {}",
                record.name
            ))));
            self.emit(TransferEvent::Progress(ProgressSnapshot::new(
                &record.file_id,
                &record.name,
                Direction::Outgoing,
                0,
                record.total_chunks,
            )));
            self.outgoing = Some(Outgoing {
                transfer,
                phase: Phase::Streaming,
            });
        }
    }

    /// Wait until the channel backlog allows another chunk.
    async fn capacity(&self) -> Result<Capacity, TransferError> {
        let buffered = self.transport.buffered_amount().await;
        let pressure = match &self.outgoing {
            Some(out) => out.transfer.sizer().assess(buffered),
            None => Pressure::Clear,
        };
        match pressure {
            Pressure::Clear => Ok(Capacity::Clear(buffered)),
            Pressure::Congested => {
                debug!(event = "backpressure_wait", buffered, "Waiting for channel to drain");
                self.transport.buffer_drained().await?;
                Ok(Capacity::Drained)
            }
        }
    }

    async fn send_next_chunk(&mut self, capacity: Capacity) -> Result<(), TransferError> {
        let Some(out) = self.outgoing.as_mut() else {
            return Ok(());
        };
        if out.phase != Phase::Streaming {
            return Ok(());
        }

        let sizer = out.transfer.sizer_mut();
        match capacity {
            Capacity::Clear(buffered) => sizer.record_clear(buffered),
            Capacity::Drained => sizer.record_wait(),
        }

        let Some((index, span)) = out.transfer.next_span() else {
            return Ok(());
        };

        let sealed = match out.transfer.seal(&self.cipher, index, span).await {
            Ok(sealed) => sealed,
            Err(e) => {
                let context = FailureContext::file(
                    &out.transfer.record.file_id,
                    &out.transfer.record.name,
                )
                .with_chunk(index);
                return self.on_seal_failure(e, context);
            }
        };
        send_chunk(&self.transport, sealed).await?;

        debug!(
            event = "chunk_sent",
            file_id = %out.transfer.record.file_id,
            chunk_index = index,
            bytes = span.len,
            chunk_size = out.transfer.sizer().current(),
        );
        let progress = ProgressSnapshot::new(
            &out.transfer.record.file_id,
            &out.transfer.record.name,
            Direction::Outgoing,
            out.transfer.emitted(),
            out.transfer.estimated_total(),
        );
        self.emit(TransferEvent::Progress(progress));
        Ok(())
    }

    /// Encryption failures end the session; a source read failure ends only that file.
    fn on_seal_failure(
        &mut self,
        e: TransferError,
        context: FailureContext,
    ) -> Result<(), TransferError> {
        if e.is_session_fatal() {
            self.fault_context = Some(context);
            return Err(e);
        }
        error!(
            event = "file_read_failure",
            file_id = ?context.file_id,
            chunk_index = ?context.chunk_index,
            error = %e,
        );
        self.outgoing = None;
        self.emit(TransferEvent::Status(TransferStatus::Error(
            TransferFailure::from_error(&e, context),
        )));
        Ok(())
    }

    async fn on_request_chunks(&mut self, request: RequestChunks) -> Result<(), TransferError> {
        let Some(out) = self
            .outgoing
            .as_mut()
            .filter(|o| o.transfer.record.file_id == request.file_id)
        else {
            warn!(event = "retransmit_unknown_file", file_id = %request.file_id);
            return Ok(());
        };

        info!(
            event = "retransmit_request",
            file_id = %request.file_id,
            count = request.indexes.len(),
        );

        let mut resent = Vec::with_capacity(request.indexes.len());
        for index in request.indexes {
            let Some(span) = out.transfer.span(index) else {
                warn!(
                    event = "retransmit_invalid_index",
                    file_id = %request.file_id,
                    chunk_index = index,
                    emitted = out.transfer.emitted(),
                );
                continue;
            };

            let buffered = self.transport.buffered_amount().await;
            if out.transfer.sizer().assess(buffered) == Pressure::Congested {
                self.transport.buffer_drained().await?;
            }

            let sealed = match out.transfer.seal(&self.cipher, index, span).await {
                Ok(sealed) => sealed,
                Err(e) => {
                    let context = FailureContext::file(
                        &out.transfer.record.file_id,
                        &out.transfer.record.name,
                    )
                    .with_chunk(index);
                    return self.on_seal_failure(e, context);
                }
            };
            send_chunk(&self.transport, sealed).await?;
            debug!(event = "chunk_resent", file_id = %request.file_id, chunk_index = index);
            resent.push(index);
        }

        let complete = ControlMessage::TransferComplete(TransferComplete {
            file_id: request.file_id.clone(),
            total_chunks: Some(out.transfer.emitted()),
        });
        send_control(&self.transport, &complete).await?;

        self.emit(TransferEvent::Retransmit {
            file_id: request.file_id,
            direction: Direction::Outgoing,
            indexes: resent,
        });
        Ok(())
    }

    fn on_ack(&mut self, ack: FileReceivedAck) {
        let matches = self
            .outgoing
            .as_ref()
            .is_some_and(|o| o.transfer.record.file_id == ack.file_id);
        if !matches {
            debug!(event = "ack_unknown_file", file_id = %ack.file_id);
            return;
        }
        let Some(out) = self.outgoing.take() else {
            return;
        };

        let record = out.transfer.record;
        info!(event = "file_sent", file_id = %record.file_id, name = %record.name, size = record.size);
        self.emit(TransferEvent::Status(TransferStatus::Success(format!(
            "Sent {}",
            record.name
        ))));
        self.emit(TransferEvent::FileSent {
            file_id: record.file_id,
            name: record.name,
        });

        if self.queue.is_empty() {
            info!(event = "all_files_sent");
            self.emit(TransferEvent::Status(TransferStatus::Success(
                "All files sent".into(),
            )));
            self.emit(TransferEvent::AllSent);
        }
    }

    // ── Transport events ─────────────────────────────────────────────────────

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<Flow, TransferError> {
        match event {
            TransportEvent::StateChange(state) => {
                debug!(event = "channel_state", state = ?state);
                self.emit(TransferEvent::ChannelState(state));
                if state == ChannelState::Closed {
                    return self.on_channel_closed();
                }
            }
            TransportEvent::Error(message) => {
                return Err(TransferError::Channel(message));
            }
            TransportEvent::Message(Frame::Text(text)) => self.on_control_text(&text).await?,
            TransportEvent::Message(Frame::Binary(data)) => self.on_binary(data),
        }
        Ok(Flow::Continue)
    }

    fn on_channel_closed(&self) -> Result<Flow, TransferError> {
        if self.has_in_flight() {
            warn!(event = "channel_closed_in_flight", "Channel closed with transfers in flight");
            Err(TransferError::ChannelClosed)
        } else {
            info!(event = "channel_closed", "Channel closed");
            Ok(Flow::Closed)
        }
    }

    async fn on_control_text(&mut self, text: &str) -> Result<(), TransferError> {
        if let Some(pending) = self.awaiting_payload.take() {
            warn!(
                event = "chunk_payload_missing",
                file_id = %pending.file_id,
                chunk_index = pending.chunk_index,
                "Control message arrived before the announced chunk payload"
            );
        }

        let message = match ControlMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(event = "control_decode_failure", error = %e, bytes = text.len());
                return Ok(());
            }
        };
        debug!(event = "control_received", kind = message.kind(), file_id = %message.file_id());

        match message {
            ControlMessage::FileMetadata(m) => self.on_file_metadata(m),
            ControlMessage::ChunkMetadata(m) => self.awaiting_payload = Some(m),
            ControlMessage::TransferComplete(m) => self.on_transfer_complete(m).await?,
            ControlMessage::RequestChunks(m) => self.on_request_chunks(m).await?,
            ControlMessage::FileReceivedAck(m) => self.on_ack(m),
        }
        Ok(())
    }

    // ── Receiver ─────────────────────────────────────────────────────────────

    fn on_file_metadata(&mut self, metadata: FileMetadata) {
        if self.incoming.contains_key(&metadata.file_id) {
            warn!(event = "duplicate_file_metadata", file_id = %metadata.file_id);
            return;
        }
        // The peer streams one file at a time, so any other open file was abandoned.
        let abandoned: Vec<String> = self.incoming.keys().cloned().collect();
        for file_id in abandoned {
            if let Some(file) = self.incoming.remove(&file_id) {
                info!(
                    event = "incoming_abandoned",
                    file_id = %file_id,
                    name = %file.metadata.name,
                    "Peer moved on before finishing this file"
                );
                self.emit(TransferEvent::FileCancelled {
                    file_id,
                    name: file.metadata.name,
                });
            }
        }
        info!(
            event = "file_receive_start",
            file_id = %metadata.file_id,
            name = %metadata.name,
            size = metadata.size,
            total_chunks = metadata.total_chunks,
        );
        self.emit(TransferEvent::Status(TransferStatus::Info(format!(
            "Receiving {}",
            metadata.name
        ))));
        self.emit(TransferEvent::Progress(ProgressSnapshot::new(
            &metadata.file_id,
            &metadata.name,
            Direction::Incoming,
            0,
            metadata.total_chunks,
        )));
        self.incoming
            .insert(metadata.file_id.clone(), ReceivingFile::new(metadata));
    }

    fn on_binary(&mut self, data: Bytes) {
        let Some(announced) = self.awaiting_payload.take() else {
            warn!(event = "unexpected_binary_frame", bytes = data.len());
            return;
        };
        let Some(file) = self.incoming.get_mut(&announced.file_id) else {
            warn!(event = "chunk_unknown_file", file_id = %announced.file_id);
            return;
        };
        if !file.accepts_index(announced.chunk_index) {
            warn!(
                event = "chunk_index_out_of_range",
                file_id = %announced.file_id,
                chunk_index = announced.chunk_index,
                size = file.metadata.size,
            );
            return;
        }

        match file.ingest(&self.cipher, &announced, &data) {
            Ok(Placement::Filled) => {
                let (filled, total) = file.progress();
                debug!(
                    event = "chunk_received",
                    file_id = %announced.file_id,
                    chunk_index = announced.chunk_index,
                    filled,
                    total,
                );
                let progress = ProgressSnapshot::new(
                    &announced.file_id,
                    &file.metadata.name,
                    Direction::Incoming,
                    filled,
                    total,
                );
                self.emit(TransferEvent::Progress(progress));
            }
            Ok(Placement::Duplicate) => {
                debug!(
                    event = "chunk_duplicate",
                    file_id = %announced.file_id,
                    chunk_index = announced.chunk_index,
                );
            }
            Err(TransferError::Decryption) => {
                warn!(
                    event = "chunk_decrypt_failure",
                    file_id = %announced.file_id,
                    chunk_index = announced.chunk_index,
                    "Discarding chunk; it will be requested again"
                );
                let text = format!(
                    "Chunk {} of {} failed to decrypt and will be requested again",
                    announced.chunk_index, file.metadata.name
                );
                self.emit(TransferEvent::Status(TransferStatus::Info(text)));
            }
            Err(e) => {
                warn!(
                    event = "chunk_rejected",
                    file_id = %announced.file_id,
                    chunk_index = announced.chunk_index,
                    code = ?e.code(),
                    error = %e,
                );
            }
        }
    }

    async fn on_transfer_complete(
        &mut self,
        complete: TransferComplete,
    ) -> Result<(), TransferError> {
        let Some(file) = self.incoming.get_mut(&complete.file_id) else {
            warn!(event = "complete_unknown_file", file_id = %complete.file_id);
            return Ok(());
        };

        match file.complete(complete.total_chunks) {
            Completion::Missing(indexes) => {
                info!(
                    event = "chunks_missing",
                    file_id = %complete.file_id,
                    count = indexes.len(),
                    "Requesting retransmission"
                );
                let request = ControlMessage::RequestChunks(RequestChunks {
                    file_id: complete.file_id.clone(),
                    indexes: indexes.clone(),
                });
                send_control(&self.transport, &request).await?;
                self.emit(TransferEvent::Retransmit {
                    file_id: complete.file_id,
                    direction: Direction::Incoming,
                    indexes,
                });
            }
            Completion::Verified(bytes) => {
                let (filled, total) = file.progress();
                let resized = total != file.metadata.total_chunks;
                let Some(file) = self.incoming.remove(&complete.file_id) else {
                    return Ok(());
                };
                let metadata = file.metadata;
                info!(
                    event = "file_received",
                    file_id = %metadata.file_id,
                    name = %metadata.name,
                    size = metadata.size,
                );
                if resized {
                    self.emit(TransferEvent::Progress(ProgressSnapshot::new(
                        &metadata.file_id,
                        &metadata.name,
                        Direction::Incoming,
                        filled,
                        total,
                    )));
                }
                let ack = ControlMessage::FileReceivedAck(FileReceivedAck {
                    file_id: metadata.file_id.clone(),
                });
                self.emit(TransferEvent::Status(TransferStatus::Success(format!(
                    "Received {}",
                    metadata.name
                ))));
                self.emit(TransferEvent::FileReceived(ReceivedFile {
                    file_id: metadata.file_id,
                    name: metadata.name,
                    mime_type: metadata.mime_type,
                    data: Bytes::from(bytes),
                }));
                send_control(&self.transport, &ack).await?;
            }
            Completion::Corrupt => {
                let Some(file) = self.incoming.remove(&complete.file_id) else {
                    return Ok(());
                };
                let metadata = file.metadata;
                error!(
                    event = "file_checksum_mismatch",
                    file_id = %metadata.file_id,
                    name = %metadata.name,
                    "Reassembled file does not match its checksum; discarding"
                );
                let err = TransferError::WholeFileChecksumMismatch {
                    file_id: metadata.file_id.clone(),
                    file_name: metadata.name.clone(),
                };
                self.emit(TransferEvent::Status(TransferStatus::Error(
                    TransferFailure::from_error(
                        &err,
                        FailureContext::file(&metadata.file_id, &metadata.name),
                    ),
                )));
            }
        }
        Ok(())
    }
}

// ── Wire helpers ─────────────────────────────────────────────────────────────

async fn send_control<T: ChannelTransport>(
    transport: &T,
    message: &ControlMessage,
) -> Result<(), TransferError> {
    transport.send_text(message.encode()?).await
}

/// Announcement first, then the ciphertext frame, back to back.
async fn send_chunk<T: ChannelTransport>(
    transport: &T,
    sealed: SealedChunk,
) -> Result<(), TransferError> {
    send_control(transport, &ControlMessage::ChunkMetadata(sealed.metadata)).await?;
    transport.send_binary(sealed.ciphertext).await
}
