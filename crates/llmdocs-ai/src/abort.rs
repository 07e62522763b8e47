use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative cancellation flag observed at every network suspension point.
#[derive(Clone)]
pub(crate) struct AbortSignal {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`AbortController::abort`] has been called.
    pub(crate) async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

pub(crate) struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub(crate) fn new() -> Self {
        Self {
            signal: AbortSignal {
                inner: Arc::new(AbortInner {
                    aborted: AtomicBool::new(false),
                    notify: Notify::new(),
                }),
            },
        }
    }

    pub(crate) fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Idempotent.
    pub(crate) fn abort(&self) {
        self.signal.inner.aborted.store(true, Ordering::SeqCst);
        self.signal.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter joined");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_aborted() {
        let controller = AbortController::new();
        controller.abort();
        controller.abort();
        let signal = controller.signal();
        assert!(signal.is_aborted());
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already aborted");
    }
}
