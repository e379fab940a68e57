//! Content digests for chunks and whole files.
//!
//! Digests are SHA-256, rendered as 64 lowercase hex characters. The same
//! function is used over a single chunk's plaintext and over a fully
//! reassembled file, so both sides agree byte-for-byte on the encoding.

use crate::utils::crypto::constant_time_eq;
use sha2::{Digest, Sha256};

/// Length of a rendered digest in characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// Digest `bytes` and return it as lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare a computed digest against a declared one without short-circuiting.
///
/// Declared digests come from the peer; upper-case hex is accepted.
pub fn matches(computed: &str, declared: &str) -> bool {
    constant_time_eq(
        computed.as_bytes(),
        declared.to_ascii_lowercase().as_bytes(),
    )
}

/// Incremental whole-file digest, for sources read piecewise from disk.
#[derive(Default)]
pub struct FileDigest {
    hasher: Sha256,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
