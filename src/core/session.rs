//! Per-connection session lifecycle.
//!
//! A [`TransferSession`] is created when a peer channel is being set up,
//! negotiates its key over the signaling relay, and is armed exactly once
//! into a [`TransferCoordinator`]. The session key never leaves the
//! session and cipher, and is dropped at teardown.

use crate::core::config::TransferConfig;
use crate::core::connection::{ChannelTransport, TransportEvent};
use crate::core::error::TransferError;
use crate::core::security::key_exchange::{decode_public_key, encode_public_key};
use crate::core::security::{ChunkCipher, KeyExchangeSession};
use crate::core::transfer::{TransferCoordinator, TransferEvent, TransferHandle};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Ready,
    Armed,
    Closed,
}

/// What [`TransferSession::arm`] hands back: the coordinator to run, its
/// control handle and its event stream.
pub type ArmedSession<T> = (
    TransferCoordinator<T>,
    TransferHandle,
    mpsc::UnboundedReceiver<TransferEvent>,
);

pub struct TransferSession {
    id: Uuid,
    role: Role,
    state: SessionState,
    exchange: KeyExchangeSession,
    local_public: Option<String>,
}

impl TransferSession {
    pub fn new(role: Role) -> Self {
        let id = Uuid::new_v4();
        debug!(event = "session_created", %id, role = ?role);
        Self {
            id,
            role,
            state: SessionState::Negotiating,
            exchange: KeyExchangeSession::new(),
            local_public: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Our public key, base64url encoded. Generated on first call, then cached.
    pub fn local_public_key(&mut self) -> Result<String, TransferError> {
        if self.state == SessionState::Closed {
            return Err(TransferError::KeyExchange("session is closed".into()));
        }
        if let Some(encoded) = &self.local_public {
            return Ok(encoded.clone());
        }
        let public = self.exchange.initiate()?;
        let encoded = encode_public_key(&public);
        self.local_public = Some(encoded.clone());
        Ok(encoded)
    }

    /// Derive the session key from the peer's encoded public key.
    pub fn complete_with(&mut self, remote_public: &str) -> Result<(), TransferError> {
        if self.state != SessionState::Negotiating {
            return Err(TransferError::KeyExchange(format!(
                "cannot complete key exchange in state {:?}",
                self.state
            )));
        }
        let remote = decode_public_key(remote_public)?;
        self.exchange.complete_with(&remote)?;
        self.state = SessionState::Ready;
        info!(event = "session_key_derived", id = %self.id, role = ?self.role);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && self.exchange.is_ready()
    }

    /// Build the coordinator for `transport`. Succeeds once per session.
    pub fn arm<T: ChannelTransport>(
        &mut self,
        transport: T,
        transport_events: mpsc::Receiver<TransportEvent>,
        config: TransferConfig,
    ) -> Result<ArmedSession<T>, TransferError> {
        if !self.is_ready() {
            return Err(TransferError::NotReady);
        }
        let cipher = ChunkCipher::for_session(&self.exchange)?;
        self.exchange.discard();
        self.state = SessionState::Armed;
        info!(event = "session_armed", id = %self.id, role = ?self.role);
        Ok(TransferCoordinator::new(
            transport,
            transport_events,
            cipher,
            config,
        ))
    }

    /// Drop any key material still held and mark the session closed.
    pub fn teardown(&mut self) {
        self.exchange.discard();
        self.local_public = None;
        if self.state != SessionState::Closed {
            info!(event = "session_closed", id = %self.id);
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.exchange.discard();
    }
}
