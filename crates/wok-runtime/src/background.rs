//! Background side-effect task tracker.
//!
//! Side-effect plans are spawned fire-and-forget but tracked, so callers can
//! wait for them with [`Drain`] before shutting down.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Tracks background task handles for eventual draining.
///
/// Dropping the tracker detaches its tasks; it never aborts them.
#[derive(Clone, Default)]
pub struct BackgroundTracker {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    pending: Arc<AtomicUsize>,
}

impl BackgroundTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a future as a tracked background task.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.pending.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard(Arc::clone(&self.pending));
        let handle = tokio::spawn(async move {
            let _guard = guard;
            future.await;
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Wait for all tracked tasks, including ones spawned while draining.
    ///
    /// Panics in individual tasks are logged and swallowed.
    pub async fn drain_all(&self) {
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return;
            }
            for result in futures::future::join_all(batch).await {
                if let Err(e) = result {
                    warn!(error = %e, "background side effect panicked");
                }
            }
        }
    }

    /// [`drain_all`](Self::drain_all) with a timeout. Returns `true` if
    /// everything completed in time.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain_all()).await.is_ok()
    }

    /// Approximate number of unfinished tasks.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BackgroundTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTracker")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

/// Handle returned by the scheduler to wait for side effects.
#[derive(Clone, Debug)]
pub struct Drain {
    tracker: BackgroundTracker,
}

impl Drain {
    /// Wrap a tracker.
    pub fn new(tracker: BackgroundTracker) -> Self {
        Self { tracker }
    }

    /// Wait until every side effect has finished.
    pub async fn wait(&self) {
        self.tracker.drain_all().await;
    }

    /// Wait up to `timeout`. Returns `true` if everything finished.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        self.tracker.drain_with_timeout(timeout).await
    }

    /// Side effects still running.
    pub fn pending(&self) -> usize {
        self.tracker.pending_count()
    }
}
