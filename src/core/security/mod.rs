//! Security module: key agreement, chunk encryption, content digests.
//!
//! Provides:
//! - Ephemeral X25519 key exchange with HKDF-SHA3-256 session key derivation
//! - AES-256-GCM sealing of chunks with a fresh random nonce per call
//! - SHA-256 hex digests for chunk- and file-level integrity

pub mod cipher;
pub mod integrity;
pub mod key_exchange;

pub use cipher::ChunkCipher;
pub use key_exchange::KeyExchangeSession;
