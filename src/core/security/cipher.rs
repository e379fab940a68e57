//! Authenticated encryption of individual chunks.
//!
//! Wire format for every sealed chunk: `nonce (12 B) || AES-256-GCM(ciphertext || tag)`.

use super::key_exchange::{KeyExchangeSession, SessionKey};
use crate::core::config::MAX_ENCRYPTIONS_PER_KEY;
use crate::core::error::TransferError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AES-256-GCM bound to one session key.
pub struct ChunkCipher {
    cipher: Aes256Gcm,
    encryptions: AtomicU64,
    limit: u64,
}

impl ChunkCipher {
    /// Build a cipher over the session's derived key.
    pub fn for_session(session: &KeyExchangeSession) -> Result<Self, TransferError> {
        let key = session.session_key().ok_or(TransferError::NotReady)?;
        Ok(Self::from_key(key))
    }

    pub(crate) fn from_key(key: &SessionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            encryptions: AtomicU64::new(0),
            limit: MAX_ENCRYPTIONS_PER_KEY,
        }
    }

    /// Cap the number of encryptions under this key.
    pub fn with_encryption_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Seal `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, TransferError> {
        // Random 96-bit nonces stay collision-safe only up to a bounded count.
        let used = self.encryptions.fetch_add(1, Ordering::Relaxed);
        if used >= self.limit {
            return Err(TransferError::Encryption(format!(
                "nonce budget of {} exhausted for this session key",
                self.limit
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| TransferError::Encryption(format!("nonce generation: {e}")))?;

        #[allow(deprecated)]
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| TransferError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Open a sealed chunk. Any tamper or key mismatch is `Decryption`.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, TransferError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(TransferError::Decryption);
        }
        #[allow(deprecated)]
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| TransferError::Decryption)
    }
}
