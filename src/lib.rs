//! Secure chunked peer-to-peer file transfer.
//!
//! Two peers meet in a rendezvous room, agree on a session key over the
//! relayed `public-key` message, and stream files over an ordered channel:
//! every chunk is hashed, sealed with AES-256-GCM, and announced with a
//! control message before its ciphertext frame. Missing or damaged chunks
//! are requested again; each file is checked against its whole-file digest
//! before it is delivered.

pub mod core;
pub mod utils;
