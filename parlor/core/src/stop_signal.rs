//! Cooperative Stop Signal
//!
//! A resettable cancellation flag shared between the controller and the
//! inference backend. Setting it never blocks; the backend notices it at its
//! next checkpoint (one fragment, one token, one tick).
//!
//! Unlike a one-shot cancellation token, the same signal is reused for every
//! turn of a session. The controller calls [`StopSignal::reset`] before each
//! backend invocation, after the previous turn has been joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// Shared, resettable stop flag
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Create a cleared signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the flag
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Set the flag and wake every task awaiting [`cancelled`](Self::cancelled)
    pub fn signal(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Non-blocking read of the flag
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is set
    ///
    /// Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent signal() is not missed
            notified.as_mut().enable();

            if self.is_signaled() {
                return;
            }
            notified.await;
        }
    }
}
