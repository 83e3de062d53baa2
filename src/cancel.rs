use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Creates a connected `Canceller`/`CancelToken` pair.
pub fn cancellation() -> (Canceller, CancelToken) {
    let shared = Arc::new(Shared {
        cancelled: AtomicBool::new(false),
        notify: Notify::new(),
    });

    (
        Canceller {
            shared: Arc::clone(&shared),
        },
        CancelToken { shared },
    )
}

/// The write half of a cancellation pair.
///
/// Cancelling is idempotent, and dropping the `Canceller` cancels too, so a
/// background task can never outlive the last handle that could stop it.
pub struct Canceller {
    shared: Arc<Shared>,
}

impl Canceller {
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            self.shared.notify.notify_waiters();
        }
    }
}

impl Drop for Canceller {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The read half of a cancellation pair. Cheap to clone; every clone observes
/// the same cancellation.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the pair is cancelled. Safe to race against other
    /// futures in a `select`; a token that is already cancelled resolves
    /// immediately.
    pub async fn cancelled(&self) {
        loop {
            // register interest before checking the flag, otherwise a cancel
            // between the check and the await would be missed
            let notified = self.shared.notify.notified();

            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }
}
