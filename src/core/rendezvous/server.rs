//! WebSocket rendezvous server.
//!
//! Accepts connections on a TCP port, upgrades each to WebSocket and runs
//! one task per connection. Each connection gets a write pump fed by an
//! unbounded queue, so delivering a message to another peer never awaits
//! while the shared registry is locked.

use super::messages::{ClientMessage, ServerMessage};
use super::room::{Outbound, PeerId, RoomRegistry};
use crate::core::config::{SignalConfig, SIGNAL_MAX_MESSAGE_SIZE};
use crate::core::error::RendezvousError;
use crate::utils::sos::SignalOfStop;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Registry plus the outbound queue of every connected peer.
#[derive(Default)]
struct Hub {
    registry: RoomRegistry,
    peers: HashMap<PeerId, mpsc::UnboundedSender<WsMessage>>,
}

impl Hub {
    fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            match message.encode() {
                Ok(text) => self.send_text(to, text),
                Err(e) => error!(event = "signal_encode_failure", error = %e),
            }
        }
    }

    fn send_text(&self, to: PeerId, text: String) {
        if let Some(tx) = self.peers.get(&to) {
            let _ = tx.send(WsMessage::Text(text.into()));
        }
    }

    fn reject(&self, peer: PeerId, err: &RendezvousError) {
        debug!(event = "signal_rejected", %peer, code = ?err.code(), error = %err);
        self.deliver(vec![Outbound {
            to: peer,
            message: ServerMessage::error(err),
        }]);
    }

    fn on_text(&mut self, peer: PeerId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::JoinRoom { room_id }) => {
                match self.registry.join(peer, room_id.as_deref()) {
                    Ok(out) => self.deliver(out),
                    Err(e) => self.reject(peer, &e),
                }
            }
            Ok(ClientMessage::Relay(kind)) => match self.registry.relay_target(peer) {
                Ok(Some(target)) => {
                    debug!(event = "signal_relay", kind = kind.as_str(), from = %peer, to = %target);
                    self.send_text(target, text.to_string());
                }
                Ok(None) => debug!(event = "signal_relay_no_peer", kind = kind.as_str(), %peer),
                Err(e) => self.reject(peer, &e),
            },
            Err(e) => {
                warn!(event = "signal_malformed", %peer, error = %e);
                self.reject(peer, &e);
            }
        }
    }

    fn disconnect(&mut self, peer: PeerId) {
        let out = self.registry.leave(peer);
        self.peers.remove(&peer);
        self.deliver(out);
    }
}

pub struct SignalServer {
    listener: TcpListener,
    hub: Arc<Mutex<Hub>>,
    stop: SignalOfStop,
}

impl SignalServer {
    /// Bind the listener. Port 0 picks a free port.
    pub async fn bind(config: &SignalConfig, stop: SignalOfStop) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind rendezvous server on {addr}"))?;
        Ok(Self {
            listener,
            hub: Arc::default(),
            stop,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the stop signal fires.
    pub async fn run(self) -> Result<()> {
        let local = self.local_addr()?;
        info!(event = "signal_listening", addr = %local, "Rendezvous server listening");

        loop {
            tokio::select! {
                _ = self.stop.wait() => {
                    info!(event = "signal_shutdown", "Rendezvous server shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let hub = self.hub.clone();
                        let stop = self.stop.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, hub, stop).await {
                                warn!(event = "signal_connection_error", %addr, error = %e);
                            }
                        });
                    }
                    Err(e) => error!(event = "signal_accept_failure", error = %e),
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Mutex<Hub>>,
    stop: SignalOfStop,
) -> Result<()> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(SIGNAL_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(SIGNAL_MAX_MESSAGE_SIZE);
    let ws = accept_async_with_config(stream, Some(ws_config))
        .await
        .context("WebSocket handshake failed")?;

    let peer = Uuid::new_v4();
    info!(event = "signal_client_connected", %addr, %peer);

    let (mut sink, mut frames) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    hub.lock().await.peers.insert(peer, tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!(event = "signal_write_failure", error = %e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = stop.wait() => break,

            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => hub.lock().await.on_text(peer, text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(WsMessage::Binary(data))) => {
                    let err = RendezvousError::Malformed(format!(
                        "binary frames are not supported ({} bytes)",
                        data.len()
                    ));
                    hub.lock().await.reject(peer, &err);
                }
                // Ping/pong is answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(event = "signal_read_failure", %peer, error = %e);
                    break;
                }
            },
        }
    }

    // Dropping the hub's queue ends the write pump.
    hub.lock().await.disconnect(peer);
    let _ = writer.await;
    info!(event = "signal_client_disconnected", %addr, %peer);
    Ok(())
}
