//! End-to-end coordinator tests over the in-memory channel pair.

use super::*;
use crate::core::config::{TransferConfig, EVENT_CHANNEL_CAPACITY};
use crate::core::connection::memory::{pair, pair_with_faults, FaultPlan, MemoryChannel};
use crate::core::connection::{ChannelTransport, Frame, TransportEvent};
use crate::core::error::{ErrorCode, TransferError};
use crate::core::pipeline::sender::seal_chunk;
use crate::core::pipeline::OutgoingFile;
use crate::core::protocol::messages::{
    ControlMessage, FileMetadata, FileReceivedAck, RequestChunks, TransferComplete,
};
use crate::core::security::cipher::tests::paired_ciphers;
use crate::core::security::{integrity, ChunkCipher};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(30);
const KB: usize = 1024;

struct Peer {
    handle: TransferHandle,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    task: JoinHandle<Result<(), TransferError>>,
}

fn spawn_peer(
    transport: MemoryChannel,
    transport_events: mpsc::Receiver<TransportEvent>,
    cipher: ChunkCipher,
    config: TransferConfig,
) -> Peer {
    let (coordinator, handle, events) =
        TransferCoordinator::new(transport, transport_events, cipher, config);
    Peer {
        handle,
        events,
        task: tokio::spawn(coordinator.run()),
    }
}

fn connect(config: TransferConfig, faults: FaultPlan) -> (Peer, Peer) {
    let ((a, a_rx), (b, b_rx)) = pair_with_faults(EVENT_CHANNEL_CAPACITY, faults);
    let (ca, cb) = paired_ciphers();
    (
        spawn_peer(a, a_rx, ca, config.clone()),
        spawn_peer(b, b_rx, cb, config),
    )
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31) % 251) as u8).collect()
}

/// Collect events until `done` matches one (inclusive).
async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<TransferEvent>,
    mut done: impl FnMut(&TransferEvent) -> bool,
) -> Vec<TransferEvent> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for transfer event")
            .expect("event stream ended");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn drain_now(events: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn progress(events: &[TransferEvent], direction: Direction) -> Vec<&ProgressSnapshot> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(p) if p.direction == direction => Some(p),
            _ => None,
        })
        .collect()
}

fn received(events: &[TransferEvent]) -> Vec<&ReceivedFile> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::FileReceived(f) => Some(f),
            _ => None,
        })
        .collect()
}

fn retransmits(events: &[TransferEvent], direction: Direction) -> Vec<Vec<u32>> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Retransmit {
                direction: d,
                indexes,
                ..
            } if *d == direction => Some(indexes.clone()),
            _ => None,
        })
        .collect()
}

fn failure(event: &TransferEvent) -> Option<&TransferFailure> {
    match event {
        TransferEvent::Status(TransferStatus::Error(f)) => Some(f),
        _ => None,
    }
}

fn is_file_received(event: &TransferEvent) -> bool {
    matches!(event, TransferEvent::FileReceived(_))
}

fn is_all_sent(event: &TransferEvent) -> bool {
    matches!(event, TransferEvent::AllSent)
}

async fn next_frame(rx: &mut mpsc::Receiver<TransportEvent>) -> Frame {
    loop {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("transport closed");
        match event {
            TransportEvent::Message(frame) => return frame,
            TransportEvent::StateChange(_) => continue,
            TransportEvent::Error(e) => panic!("transport error: {e}"),
        }
    }
}

async fn next_control(rx: &mut mpsc::Receiver<TransportEvent>) -> ControlMessage {
    match next_frame(rx).await {
        Frame::Text(text) => ControlMessage::decode(&text).unwrap(),
        Frame::Binary(b) => panic!("expected control message, got {} binary bytes", b.len()),
    }
}

async fn next_binary(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<u8> {
    match next_frame(rx).await {
        Frame::Binary(b) => b.to_vec(),
        Frame::Text(t) => panic!("expected binary frame, got {t}"),
    }
}

async fn send_control(transport: &MemoryChannel, message: ControlMessage) {
    transport.send_text(message.encode().unwrap()).await.unwrap();
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_mebibyte_streams_in_sixteen_default_chunks() {
    let config = TransferConfig::fixed_chunk_size(64 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::default());
    let data = patterned(1_048_576);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("movie.bin", "", data.clone())])
        .unwrap();

    let rx_events = collect_until(&mut receiver.events, is_file_received).await;
    let file = received(&rx_events)[0];
    assert_eq!(file.name, "movie.bin");
    assert_eq!(file.data.as_ref(), data.as_slice());
    assert_eq!(integrity::digest(&file.data), integrity::digest(&data));

    let incoming = progress(&rx_events, Direction::Incoming);
    let last = incoming.last().unwrap();
    assert_eq!(last.total_chunks, 16);
    assert_eq!(last.transferred_chunks, 16);
    assert_eq!(last.percentage, 100.0);

    let tx_events = collect_until(&mut sender.events, is_all_sent).await;
    let outgoing = progress(&tx_events, Direction::Outgoing);
    let sent: Vec<u32> = outgoing.iter().map(|p| p.transferred_chunks).collect();
    assert_eq!(sent, (0..=16).collect::<Vec<_>>());
    assert!(outgoing.iter().all(|p| p.total_chunks == 16));
    assert!(tx_events
        .iter()
        .any(|e| matches!(e, TransferEvent::FileSent { name, .. } if name == "movie.bin")));
    assert!(retransmits(&tx_events, Direction::Outgoing).is_empty());
}

#[tokio::test]
async fn dropped_frame_is_requested_and_resent_alone() {
    let config = TransferConfig::fixed_chunk_size(64 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::drop_nth(5));
    let data = patterned(10 * 64 * KB + 100);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("a.bin", "", data.clone())])
        .unwrap();

    let rx_events = collect_until(&mut receiver.events, is_file_received).await;
    assert_eq!(retransmits(&rx_events, Direction::Incoming), vec![vec![5]]);
    assert_eq!(received(&rx_events)[0].data.as_ref(), data.as_slice());

    let tx_events = collect_until(&mut sender.events, is_all_sent).await;
    assert_eq!(retransmits(&tx_events, Direction::Outgoing), vec![vec![5]]);
}

#[tokio::test]
async fn corrupted_frame_is_discarded_and_recovered() {
    let config = TransferConfig::fixed_chunk_size(64 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::corrupt_nth(3));
    let data = patterned(6 * 64 * KB);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("b.bin", "", data.clone())])
        .unwrap();

    let rx_events = collect_until(&mut receiver.events, is_file_received).await;
    assert!(rx_events.iter().any(|e| matches!(
        e,
        TransferEvent::Status(TransferStatus::Info(text)) if text.contains("failed to decrypt")
    )));
    assert!(rx_events.iter().all(|e| failure(e).is_none()));
    assert_eq!(retransmits(&rx_events, Direction::Incoming), vec![vec![3]]);
    assert_eq!(received(&rx_events)[0].data.as_ref(), data.as_slice());

    collect_until(&mut sender.events, is_all_sent).await;
}

#[tokio::test]
async fn queued_files_of_edge_sizes_all_arrive() {
    let config = TransferConfig::fixed_chunk_size(64 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::default());
    let files = vec![
        ("empty.txt", Vec::new()),
        ("one.txt", vec![42u8]),
        ("exact.bin", patterned(64 * KB)),
        ("multi.bin", patterned(3 * 64 * KB + 5)),
    ];

    sender
        .handle
        .send_files(
            files
                .iter()
                .map(|(name, data)| OutgoingFile::from_bytes(*name, "", data.clone()))
                .collect(),
        )
        .unwrap();

    let mut count = 0;
    let rx_events = collect_until(&mut receiver.events, |e| {
        if is_file_received(e) {
            count += 1;
        }
        count == files.len()
    })
    .await;

    let got = received(&rx_events);
    for ((name, data), file) in files.iter().zip(got) {
        assert_eq!(&file.name, name);
        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(integrity::digest(&file.data), integrity::digest(data));
    }

    let tx_events = collect_until(&mut sender.events, is_all_sent).await;
    let sent = tx_events
        .iter()
        .filter(|e| matches!(e, TransferEvent::FileSent { .. }))
        .count();
    assert_eq!(sent, files.len());
}

#[tokio::test]
async fn tight_watermarks_vary_chunk_sizes_but_reassemble_exactly() {
    let config = TransferConfig {
        default_chunk_size: 16 * KB,
        min_chunk_size: 4 * KB,
        max_chunk_size: 64 * KB,
        high_water_mark: 96 * KB,
        low_water_mark: 32 * KB,
        adaptive_chunk_size: true,
        ..TransferConfig::default()
    };
    config.validate().unwrap();
    let (mut sender, mut receiver) = connect(config, FaultPlan::default());
    let data = patterned(2 * KB * KB + 333);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("adaptive.bin", "", data.clone())])
        .unwrap();

    let rx_events = collect_until(&mut receiver.events, is_file_received).await;
    let file = received(&rx_events)[0];
    assert_eq!(file.size(), data.len() as u64);
    assert_eq!(file.data.as_ref(), data.as_slice());

    collect_until(&mut sender.events, is_all_sent).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_halts_progress_and_resume_continues_without_gaps() {
    let config = TransferConfig::fixed_chunk_size(16 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::default());
    let data = patterned(16 * KB * KB);
    let total = (data.len() / (16 * KB)) as u32;

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("big.bin", "", data.clone())])
        .unwrap();

    let mut history = collect_until(&mut sender.events, |e| {
        matches!(e, TransferEvent::Progress(p) if p.transferred_chunks >= 1)
    })
    .await;
    sender.handle.pause();
    assert!(sender.handle.is_paused());

    tokio::time::sleep(Duration::from_millis(150)).await;
    history.extend(drain_now(&mut sender.events));
    let at_pause = progress(&history, Direction::Outgoing)
        .last()
        .map(|p| p.transferred_chunks)
        .unwrap();
    assert!(at_pause < total, "transfer finished before pause took effect");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let while_paused = drain_now(&mut sender.events);
    assert!(progress(&while_paused, Direction::Outgoing).is_empty());
    history.extend(while_paused);

    sender.handle.resume();
    history.extend(collect_until(&mut sender.events, is_all_sent).await);

    let sent: Vec<u32> = progress(&history, Direction::Outgoing)
        .iter()
        .map(|p| p.transferred_chunks)
        .collect();
    assert_eq!(sent, (0..=total).collect::<Vec<_>>());

    let rx_events = collect_until(&mut receiver.events, is_file_received).await;
    assert_eq!(received(&rx_events)[0].data.as_ref(), data.as_slice());
    assert!(retransmits(&rx_events, Direction::Incoming).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_current_file_moves_to_next() {
    let config = TransferConfig::fixed_chunk_size(16 * KB);
    let (mut sender, mut receiver) = connect(config, FaultPlan::default());
    let small = patterned(10 * KB);

    sender
        .handle
        .send_files(vec![
            OutgoingFile::from_bytes("huge.bin", "", patterned(16 * KB * KB)),
            OutgoingFile::from_bytes("small.bin", "", small.clone()),
        ])
        .unwrap();

    collect_until(&mut sender.events, |e| {
        matches!(e, TransferEvent::Progress(p) if p.transferred_chunks >= 1)
    })
    .await;
    sender.handle.cancel_current().unwrap();

    let tx_events = collect_until(&mut sender.events, is_all_sent).await;
    assert!(tx_events.iter().any(
        |e| matches!(e, TransferEvent::FileCancelled { name, .. } if name == "huge.bin")
    ));
    assert!(tx_events
        .iter()
        .any(|e| matches!(e, TransferEvent::FileSent { name, .. } if name == "small.bin")));

    let rx_events = collect_until(&mut receiver.events, |e| {
        matches!(e, TransferEvent::FileReceived(f) if f.name == "small.bin")
    })
    .await;
    let file = received(&rx_events).into_iter().last().unwrap();
    assert_eq!(file.data.as_ref(), small.as_slice());
    assert!(rx_events.iter().any(
        |e| matches!(e, TransferEvent::FileCancelled { name, .. } if name == "huge.bin")
    ));

    // The abandoned file holds nothing open, so a later close is clean.
    sender.handle.shutdown();
    let result = tokio::time::timeout(TIMEOUT, receiver.task).await.unwrap().unwrap();
    assert!(result.is_ok(), "receiver ended with {result:?}");
    assert!(drain_now(&mut receiver.events).iter().all(|e| failure(e).is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn channel_close_mid_transfer_surfaces_channel_error() {
    let config = TransferConfig::fixed_chunk_size(16 * KB);
    let (mut sender, receiver) = connect(config, FaultPlan::default());

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes(
            "big.bin",
            "",
            patterned(16 * KB * KB),
        )])
        .unwrap();
    collect_until(&mut sender.events, |e| {
        matches!(e, TransferEvent::Progress(p) if p.transferred_chunks >= 1)
    })
    .await;

    receiver.handle.shutdown();
    assert!(receiver.task.await.unwrap().is_ok());

    let events = collect_until(&mut sender.events, |e| failure(e).is_some()).await;
    let fail = failure(events.last().unwrap()).unwrap();
    assert_eq!(fail.code, ErrorCode::ChannelError);
    assert_eq!(fail.context.file_name.as_deref(), Some("big.bin"));

    let result = tokio::time::timeout(TIMEOUT, sender.task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(TransferError::ChannelClosed) | Err(TransferError::Channel(_))
    ));
}

#[tokio::test]
async fn encryption_failure_tears_the_session_down() {
    let ((a, a_rx), (b, b_rx)) = pair(EVENT_CHANNEL_CAPACITY);
    let (ca, cb) = paired_ciphers();
    let config = TransferConfig::fixed_chunk_size(16 * KB);
    let mut sender = spawn_peer(a, a_rx, ca.with_encryption_limit(3), config.clone());
    let mut receiver = spawn_peer(b, b_rx, cb, config);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("x.bin", "", patterned(10 * 16 * KB))])
        .unwrap();

    let events = collect_until(&mut sender.events, |e| failure(e).is_some()).await;
    let fail = failure(events.last().unwrap()).unwrap();
    assert_eq!(fail.code, ErrorCode::EncryptionFailed);
    assert_eq!(fail.context.chunk_index, Some(3));
    assert_eq!(fail.context.file_name.as_deref(), Some("x.bin"));
    assert!(matches!(
        sender.task.await.unwrap(),
        Err(TransferError::Encryption(_))
    ));

    let rx_events = collect_until(&mut receiver.events, |e| failure(e).is_some()).await;
    assert_eq!(
        failure(rx_events.last().unwrap()).unwrap().code,
        ErrorCode::ChannelError
    );
    assert!(received(&rx_events).is_empty());
}

// ── Wire-level behaviour against a scripted peer ─────────────────────────────

#[tokio::test]
async fn resend_serves_recorded_spans_and_ignores_unknown_indices() {
    let ((a, a_rx), (raw, mut raw_rx)) = pair(EVENT_CHANNEL_CAPACITY);
    let (ca, cb) = paired_ciphers();
    let mut sender = spawn_peer(a, a_rx, ca, TransferConfig::fixed_chunk_size(16 * KB));
    let data = patterned(3 * 16 * KB + 1);

    sender
        .handle
        .send_files(vec![OutgoingFile::from_bytes("r.bin", "", data.clone())])
        .unwrap();

    let ControlMessage::FileMetadata(meta) = next_control(&mut raw_rx).await else {
        panic!("expected file-metadata");
    };
    assert_eq!(meta.total_chunks, 4);
    assert_eq!(meta.full_file_checksum, integrity::digest(&data));

    for index in 0..4u32 {
        let ControlMessage::ChunkMetadata(chunk) = next_control(&mut raw_rx).await else {
            panic!("expected chunk-metadata");
        };
        assert_eq!(chunk.chunk_index, index);
        let plaintext = cb.decrypt(&next_binary(&mut raw_rx).await).unwrap();
        assert_eq!(plaintext.len(), chunk.size as usize);
        assert_eq!(integrity::digest(&plaintext), chunk.checksum);
    }
    assert_eq!(
        next_control(&mut raw_rx).await,
        ControlMessage::TransferComplete(TransferComplete {
            file_id: meta.file_id.clone(),
            total_chunks: Some(4),
        })
    );

    send_control(
        &raw,
        ControlMessage::RequestChunks(RequestChunks {
            file_id: meta.file_id.clone(),
            indexes: vec![2, 99],
        }),
    )
    .await;

    let ControlMessage::ChunkMetadata(chunk) = next_control(&mut raw_rx).await else {
        panic!("expected resent chunk-metadata");
    };
    assert_eq!(chunk.chunk_index, 2);
    let plaintext = cb.decrypt(&next_binary(&mut raw_rx).await).unwrap();
    assert_eq!(plaintext, &data[2 * 16 * KB..3 * 16 * KB]);
    assert!(matches!(
        next_control(&mut raw_rx).await,
        ControlMessage::TransferComplete(TransferComplete { total_chunks: Some(4), .. })
    ));

    send_control(
        &raw,
        ControlMessage::FileReceivedAck(FileReceivedAck {
            file_id: meta.file_id.clone(),
        }),
    )
    .await;
    let events = collect_until(&mut sender.events, is_all_sent).await;
    assert_eq!(retransmits(&events, Direction::Outgoing), vec![vec![2]]);
}

#[tokio::test]
async fn whole_file_mismatch_fails_only_that_file() {
    let ((raw, mut raw_rx), (b, b_rx)) = pair(EVENT_CHANNEL_CAPACITY);
    let (ca, cb) = paired_ciphers();
    let mut receiver = spawn_peer(b, b_rx, cb, TransferConfig::default());

    let announce = |file_id: &str, data: &[u8], checksum: String| {
        ControlMessage::FileMetadata(FileMetadata {
            file_id: file_id.into(),
            name: format!("{file_id}.txt"),
            mime_type: "text/plain".into(),
            size: data.len() as u64,
            total_chunks: 1,
            full_file_checksum: checksum,
        })
    };

    // A chunk that is individually valid, under a file digest that is not.
    send_control(&raw, announce("bad", b"hello", integrity::digest(b"other"))).await;
    let sealed = seal_chunk(&ca, "bad", 0, b"hello").unwrap();
    send_control(&raw, ControlMessage::ChunkMetadata(sealed.metadata)).await;
    raw.send_binary(sealed.ciphertext).await.unwrap();
    send_control(
        &raw,
        ControlMessage::TransferComplete(TransferComplete {
            file_id: "bad".into(),
            total_chunks: None,
        }),
    )
    .await;

    let events = collect_until(&mut receiver.events, |e| failure(e).is_some()).await;
    let fail = failure(events.last().unwrap()).unwrap();
    assert_eq!(fail.code, ErrorCode::ChecksumMismatch);
    assert_eq!(fail.context.file_id.as_deref(), Some("bad"));
    assert!(received(&events).is_empty());

    send_control(&raw, announce("good", b"world", integrity::digest(b"world"))).await;
    let sealed = seal_chunk(&ca, "good", 0, b"world").unwrap();
    send_control(&raw, ControlMessage::ChunkMetadata(sealed.metadata)).await;
    raw.send_binary(sealed.ciphertext).await.unwrap();
    send_control(
        &raw,
        ControlMessage::TransferComplete(TransferComplete {
            file_id: "good".into(),
            total_chunks: Some(1),
        }),
    )
    .await;

    let events = collect_until(&mut receiver.events, is_file_received).await;
    assert_eq!(received(&events)[0].data.as_ref(), b"world");

    // The only acknowledgement on the wire is for the good file.
    assert_eq!(
        next_control(&mut raw_rx).await,
        ControlMessage::FileReceivedAck(FileReceivedAck {
            file_id: "good".into()
        })
    );
}

#[tokio::test]
async fn stray_frames_are_ignored() {
    let ((raw, _raw_rx), (b, b_rx)) = pair(EVENT_CHANNEL_CAPACITY);
    let (ca, cb) = paired_ciphers();
    let mut receiver = spawn_peer(b, b_rx, cb, TransferConfig::default());

    // Binary with no announcement, garbage text, chunk for an unknown file.
    raw.send_binary(bytes::Bytes::from_static(b"orphan")).await.unwrap();
    raw.send_text("{\"type\":\"nope\"}".into()).await.unwrap();
    let sealed = seal_chunk(&ca, "ghost", 0, b"boo").unwrap();
    send_control(&raw, ControlMessage::ChunkMetadata(sealed.metadata)).await;
    raw.send_binary(sealed.ciphertext).await.unwrap();

    // The session is still healthy afterwards.
    send_control(
        &raw,
        ControlMessage::FileMetadata(FileMetadata {
            file_id: "e".into(),
            name: "e.txt".into(),
            mime_type: "text/plain".into(),
            size: 0,
            total_chunks: 0,
            full_file_checksum: integrity::digest(b""),
        }),
    )
    .await;
    send_control(
        &raw,
        ControlMessage::TransferComplete(TransferComplete {
            file_id: "e".into(),
            total_chunks: Some(0),
        }),
    )
    .await;
    let events = collect_until(&mut receiver.events, is_file_received).await;
    assert!(received(&events)[0].data.is_empty());
    assert!(events.iter().all(|e| failure(e).is_none()));
}
