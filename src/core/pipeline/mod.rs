//! Transfer pipeline: chunk bookkeeping, sender sources, receiver reassembly.

pub mod chunk;
pub mod receiver;
pub mod sender;

pub use sender::OutgoingFile;
