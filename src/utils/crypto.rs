//! Keyed-hash primitives: HMAC-SHA3-256, HKDF over it, constant-time comparison.
//!
//! Invariants:
//! - HMAC follows RFC 2104 with SHA3-256 (rate = 136 bytes).
//! - HKDF follows RFC 5869 (extract, then a single expand block).
//! - Comparisons of digests and tags never short-circuit.

use sha3::{Digest, Sha3_256};

/// SHA3-256 block size (rate in bytes for Keccak with 256-bit capacity).
const BLOCK_SIZE: usize = 136;

/// HMAC-SHA3-256.
pub fn hmac_sha3_256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let block_key = block_sized_key(key);

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= block_key[i];
        opad[i] ^= block_key[i];
    }

    let inner_hash = {
        let mut inner = Sha3_256::new();
        inner.update(ipad);
        inner.update(data);
        inner.finalize()
    };

    let mut outer = Sha3_256::new();
    outer.update(opad);
    outer.update(inner_hash);
    outer.finalize().into()
}

/// HKDF-SHA3-256 producing a single 32-byte output key.
///
/// `salt` may be empty; `info` binds the key to its purpose.
pub fn hkdf_sha3_256(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let prk = hmac_sha3_256(salt, ikm);

    let mut expand_msg = Vec::with_capacity(info.len() + 1);
    expand_msg.extend_from_slice(info);
    expand_msg.push(0x01);
    hmac_sha3_256(&prk, &expand_msg)
}

/// Hash the key if it is longer than a block, zero-pad it otherwise.
fn block_sized_key(key: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut k = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = Sha3_256::digest(key);
        k[..32].copy_from_slice(&digest);
    } else {
        k[..key.len()].copy_from_slice(key);
    }
    k
}

/// Constant-time equality for byte strings.
///
/// Length is not secret; unequal lengths return `false` immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
