//! Signal-of-Stop: cooperative cancellation primitive.
//!
//! A cloneable, async-aware stop flag. Cancelling any clone wakes every
//! task waiting on any other clone. Used to tear down a transfer session
//! and to stop the rendezvous server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative cancellation token.
#[derive(Debug, Default, Clone)]
pub struct SignalOfStop {
    internal: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    notify: Notify,
}

impl SignalOfStop {
    /// Create a new, uncancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to all waiters.
    pub fn cancel(&self) {
        self.internal.closing.store(true, Ordering::Release);
        self.internal.notify.notify_waiters();
    }

    /// Check if cancellation has been signaled.
    pub fn cancelled(&self) -> bool {
        self.internal.closing.load(Ordering::Acquire)
    }

    /// Wait for cancellation. Returns immediately if already cancelled.
    pub async fn wait(&self) {
        loop {
            let notified = self.internal.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel is not lost.
            notified.as_mut().enable();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}
