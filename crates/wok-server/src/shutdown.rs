//! Server shutdown sequence.
//!
//! Cancelling the root token stops the listener and makes every channel
//! session retire its invocations, each of which still emits `DONE`. The
//! coordinator then waits for the listener and the sessions to finish and
//! drains side-effect plans, all against a single deadline.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};
use wok_runtime::BackgroundTracker;

/// What finished before the shutdown deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The HTTP listener task returned.
    pub listener_stopped: bool,
    /// Every channel session ended.
    pub channels_closed: bool,
    /// Every side-effect plan completed.
    pub side_effects_drained: bool,
}

impl ShutdownReport {
    /// Whether nothing was left running at the deadline.
    pub fn is_clean(&self) -> bool {
        self.listener_stopped && self.channels_closed && self.side_effects_drained
    }
}

/// Owns the root cancellation token, the open channel sessions and the
/// side-effect tracker shared with the scheduler.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    channels: TaskTracker,
    background: BackgroundTracker,
}

impl ShutdownCoordinator {
    /// Coordinator draining `background` on shutdown.
    pub fn new(background: BackgroundTracker) -> Self {
        Self {
            token: CancellationToken::new(),
            channels: TaskTracker::new(),
            background,
        }
    }

    /// Clone of the root token. Request and invocation tokens are children of it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the root token without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Count `session` as an open channel until it completes.
    pub fn track_channel<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.channels.track_future(session)
    }

    /// Open channel sessions.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run the full shutdown sequence, giving up after `timeout`.
    pub async fn graceful_shutdown(
        &self,
        listener: JoinHandle<()>,
        timeout: Duration,
    ) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        self.shutdown();
        let _ = self.channels.close();
        info!(
            channels = self.channels.len(),
            side_effects = self.background.pending_count(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "shutting down"
        );

        let listener_stopped = match timeout_at(deadline, listener).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "listener task failed");
                true
            }
            Err(_) => false,
        };
        let channels_closed = timeout_at(deadline, self.channels.wait()).await.is_ok();
        let side_effects_drained = timeout_at(deadline, self.background.drain_all())
            .await
            .is_ok();

        let report = ShutdownReport {
            listener_stopped,
            channels_closed,
            side_effects_drained,
        };
        if report.is_clean() {
            info!("shutdown complete");
        } else {
            warn!(?report, "shutdown deadline reached with work outstanding");
        }
        report
    }
}
