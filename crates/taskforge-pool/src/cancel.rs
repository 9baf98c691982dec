//! External cancellation handles.
//!
//! A [`CancelHandle`] lets a caller abandon a job from outside the pool: the
//! caller keeps one clone, passes another with the submission, and triggers
//! it whenever the result is no longer wanted. The pool observes the handle
//! and deregisters its listener once the job completes; it never takes
//! ownership.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot cancellation trigger, cheaply cloneable (`Arc`-backed).
///
/// Once triggered, a handle stays triggered; there is no reset.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    /// Create an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the handle, waking every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!("cancel handle triggered");
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the handle has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the handle is triggered.
    ///
    /// Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a trigger that
            // lands between the check and the await still wakes us.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
