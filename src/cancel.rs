//! Cooperative cancellation shared between a job and its in-flight request.
//!
//! The token is a cancelled flag plus a single slot holding the handle of the
//! request currently on the wire. `cancel()` flips the flag and fires the
//! handle, so a request blocked on headers or on the next body chunk wakes up
//! immediately; everything else observes the flag at its next check point.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Abort signal for one in-flight request.
pub type RequestHandle = tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    next_request: AtomicU64,
    active: Mutex<Option<ActiveRequest>>,
}

#[derive(Debug)]
struct ActiveRequest {
    id: u64,
    handle: RequestHandle,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark cancelled and abort the registered request, if any. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(active) = self.inner.active.lock().take() {
            debug!("Aborting in-flight request {}", active.id);
            active.handle.cancel();
        }
    }

    /// Clear the flag and forget any registered request. Called once at the
    /// start of every job.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.active.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Publish a fresh request handle in the slot. The returned guard clears
    /// the slot on drop, but only if the slot still holds this request.
    pub fn register_request(&self) -> RequestGuard {
        let id = self.inner.next_request.fetch_add(1, Ordering::SeqCst);
        let handle = RequestHandle::new();

        *self.inner.active.lock() = Some(ActiveRequest {
            id,
            handle: handle.clone(),
        });

        // A cancel that landed between the caller's flag check and the
        // registration above would otherwise be lost.
        if self.is_cancelled() {
            handle.cancel();
        }

        RequestGuard {
            inner: Arc::clone(&self.inner),
            id,
            handle,
        }
    }

    pub fn has_active_request(&self) -> bool {
        self.inner.active.lock().is_some()
    }
}

/// Registration of one request with a [`CancellationToken`].
#[derive(Debug)]
pub struct RequestGuard {
    inner: Arc<Inner>,
    id: u64,
    handle: RequestHandle,
}

impl RequestGuard {
    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    /// Resolves once the request has been aborted through the token.
    pub async fn aborted(&self) {
        self.handle.cancelled().await
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|a| a.id == self.id) {
            active.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_and_reset() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());

        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_fires_registered_handle() {
        let token = CancellationToken::new();
        let guard = token.register_request();
        assert!(token.has_active_request());

        token.cancel();
        assert!(guard.handle().is_cancelled());
        assert!(!token.has_active_request());
    }

    #[test]
    fn test_guard_clears_only_its_own_registration() {
        let token = CancellationToken::new();
        let first = token.register_request();
        let second = token.register_request();

        drop(first);
        assert!(token.has_active_request());

        drop(second);
        assert!(!token.has_active_request());
    }

    #[test]
    fn test_stale_handle_is_not_aborted_after_completion() {
        let token = CancellationToken::new();
        let finished = token.register_request();
        let stale = finished.handle().clone();
        drop(finished);

        token.cancel();
        assert!(!stale.is_cancelled());
    }

    #[test]
    fn test_register_after_cancel_is_already_aborted() {
        let token = CancellationToken::new();
        token.cancel();
        let guard = token.register_request();
        assert!(guard.handle().is_cancelled());
    }

    #[test]
    fn test_cancel_from_another_task_wakes_waiter() {
        tokio_test::block_on(async {
            let token = CancellationToken::new();
            let guard = token.register_request();

            let remote = token.clone();
            let canceller = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                remote.cancel();
            });

            tokio::time::timeout(Duration::from_secs(2), guard.aborted())
                .await
                .expect("request should be aborted");
            canceller.await.unwrap();
        });
    }
}
