//! Transfer coordination: the protocol state machine, its control handle and events.

pub mod control;
pub mod coordinator;
pub mod events;

#[cfg(test)]
mod tests;

pub use control::TransferHandle;
pub use coordinator::TransferCoordinator;
pub use events::{
    Direction, FailureContext, ProgressSnapshot, ReceivedFile, TransferEvent, TransferFailure,
    TransferStatus,
};
