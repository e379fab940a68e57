//! Ephemeral key agreement and session key derivation.
//!
//! **Protocol (over the relayed `public-key` signaling message):**
//!
//! ```text
//! Peer A                           Peer B
//! ──────                           ──────
//! eph_pk_A  ──────────────────────► eph_pk_B
//! eph_pk_B  ◄──────────────────────
//!
//! shared_secret = X25519(eph_sk_A, eph_pk_B)
//!
//! session_key = HKDF-SHA3-256(
//!     ikm  = shared_secret,
//!     salt = sort(eph_pk_A, eph_pk_B),
//!     info = b"swaz-session-v1"
//! )
//! ```
//!
//! The secret half is consumed by the derivation; a session never derives
//! twice from the same key pair, and nothing here is persisted.

use crate::core::error::TransferError;
use crate::utils::crypto::hkdf_sha3_256;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// HKDF `info` label binding derived keys to this protocol version.
const SESSION_KEY_INFO: &[u8] = b"swaz-session-v1";

/// Length of an X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// 256-bit symmetric session key. Zeroed on drop, never printed.
pub struct SessionKey(Zeroizing<[u8; 32]>);

impl SessionKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// One side of an ephemeral X25519 exchange.
#[derive(Default)]
pub struct KeyExchangeSession {
    secret: Option<StaticSecret>,
    public: Option<[u8; PUBLIC_KEY_LEN]>,
    session_key: Option<SessionKey>,
}

impl KeyExchangeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh key pair and return its public half.
    ///
    /// Calling again discards the previous pair and any derived key.
    pub fn initiate(&mut self) -> Result<[u8; PUBLIC_KEY_LEN], TransferError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(seed.as_mut_slice())
            .map_err(|e| TransferError::KeyGeneration(e.to_string()))?;

        let secret = StaticSecret::from(*seed);
        let public = *X25519PublicKey::from(&secret).as_bytes();

        self.secret = Some(secret);
        self.public = Some(public);
        self.session_key = None;
        Ok(public)
    }

    /// Derive the session key from the peer's public key.
    pub fn complete_with(&mut self, remote_public: &[u8]) -> Result<(), TransferError> {
        let (Some(secret), Some(local_public)) = (self.secret.as_ref(), self.public) else {
            return Err(TransferError::KeyExchange(
                "initiate() must be called before complete_with()".into(),
            ));
        };

        let remote: [u8; PUBLIC_KEY_LEN] = remote_public.try_into().map_err(|_| {
            TransferError::KeyExchange(format!(
                "malformed remote public key: expected {PUBLIC_KEY_LEN} bytes, got {}",
                remote_public.len()
            ))
        })?;

        let shared = secret.diffie_hellman(&X25519PublicKey::from(remote));
        if !shared.was_contributory() {
            return Err(TransferError::KeyExchange(
                "remote public key is a low-order point".into(),
            ));
        }

        let mut pks = [local_public, remote];
        pks.sort();
        let mut salt = [0u8; 2 * PUBLIC_KEY_LEN];
        salt[..PUBLIC_KEY_LEN].copy_from_slice(&pks[0]);
        salt[PUBLIC_KEY_LEN..].copy_from_slice(&pks[1]);

        let key = Zeroizing::new(hkdf_sha3_256(shared.as_bytes(), &salt, SESSION_KEY_INFO));
        self.session_key = Some(SessionKey(key));
        self.secret = None;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.session_key.is_some()
    }

    pub fn public_key(&self) -> Option<[u8; PUBLIC_KEY_LEN]> {
        self.public
    }

    pub(crate) fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Drop all key material held by this exchange.
    pub fn discard(&mut self) {
        self.secret = None;
        self.session_key = None;
    }
}

/// Encode a public key for the signaling channel (base64url, no padding).
pub fn encode_public_key(public: &[u8; PUBLIC_KEY_LEN]) -> String {
    URL_SAFE_NO_PAD.encode(public)
}

/// Decode a public key received over signaling.
pub fn decode_public_key(encoded: &str) -> Result<Vec<u8>, TransferError> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|e| TransferError::KeyExchange(format!("public key is not base64url: {e}")))
}
