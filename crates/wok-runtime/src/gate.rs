//! Concurrency gate and redirect slot shared by one `handle` call.
//!
//! A single mutex guards the in-flight async count and the redirect slot.
//! Every change bumps a generation counter and wakes all waiters, so a
//! waiter that read generation `g` can sleep until something newer happens
//! without missing a wake-up.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wok_core::{Params, Route};

/// A plan-initiated change of target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedirectRequest {
    /// New route, if the route changes.
    pub route: Option<Route>,
    /// New params, if they change.
    pub params: Option<Params>,
}

#[derive(Debug, Default)]
struct GateState {
    running: usize,
    redirect: Option<RedirectRequest>,
    epoch: u64,
    generation: u64,
}

impl GateState {
    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Consistent snapshot of the gate.
#[derive(Clone, Debug)]
pub struct GateView {
    /// Async instances still in flight.
    pub running: usize,
    /// Redirect posted during the current iteration.
    pub redirect: Option<RedirectRequest>,
    /// Change counter at the time of the snapshot.
    pub generation: u64,
}

/// Per-call coordination point between the scheduler and its plans.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Gate {
    /// Fresh gate with nothing running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new iteration: clears the redirect slot and returns the epoch
    /// plans of this iteration must post redirects under.
    pub(crate) fn begin_iteration(&self) -> u64 {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.redirect = None;
        state.bump();
        state.epoch
    }

    /// Post a redirect. The first request of an iteration wins; requests
    /// from earlier iterations are ignored. Returns whether it was accepted.
    pub fn post_redirect(&self, epoch: u64, request: RedirectRequest) -> bool {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!(epoch, current = state.epoch, "ignoring redirect from stale iteration");
                return false;
            }
            if state.redirect.is_some() {
                debug!(epoch, "redirect already posted this iteration");
                return false;
            }
            state.redirect = Some(request);
            state.bump();
        }
        self.notify.notify_waiters();
        true
    }

    /// Count one async instance as running until the guard drops.
    pub fn start(self: &Arc<Self>) -> RunningGuard {
        let mut state = self.state.lock();
        state.running += 1;
        state.bump();
        RunningGuard {
            gate: Arc::clone(self),
        }
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            state.bump();
        }
        self.notify.notify_waiters();
    }

    /// Async instances in flight.
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> GateView {
        let state = self.state.lock();
        GateView {
            running: state.running,
            redirect: state.redirect.clone(),
            generation: state.generation,
        }
    }

    /// Sleep until the generation moves past `generation` or `abort` fires.
    pub async fn wait_past(&self, generation: u64, abort: &CancellationToken) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            let _ = notified.as_mut().enable();

            if self.state.lock().generation != generation || abort.is_cancelled() {
                return;
            }

            tokio::select! {
                () = &mut notified => {}
                () = abort.cancelled() => return,
            }
        }
    }
}

/// Decrements the running count and wakes waiters on drop, including when
/// the owning task unwinds.
#[derive(Debug)]
pub struct RunningGuard {
    gate: Arc<Gate>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.gate.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn to(route: &[&str]) -> RedirectRequest {
        RedirectRequest {
            route: Some(route.iter().copied().collect()),
            params: None,
        }
    }

    #[test]
    fn first_redirect_wins() {
        let gate = Gate::new();
        let epoch = gate.begin_iteration();
        assert!(gate.post_redirect(epoch, to(&["a"])));
        assert!(!gate.post_redirect(epoch, to(&["b"])));
        assert_eq!(gate.view().redirect, Some(to(&["a"])));
    }

    #[test]
    fn stale_epoch_is_ignored() {
        let gate = Gate::new();
        let old = gate.begin_iteration();
        let _ = gate.begin_iteration();
        assert!(!gate.post_redirect(old, to(&["a"])));
        assert!(gate.view().redirect.is_none());
    }

    #[test]
    fn new_iteration_clears_slot() {
        let gate = Gate::new();
        let epoch = gate.begin_iteration();
        assert!(gate.post_redirect(epoch, to(&["a"])));
        let _ = gate.begin_iteration();
        assert!(gate.view().redirect.is_none());
    }

    #[test]
    fn guard_drop_decrements() {
        let gate = Arc::new(Gate::new());
        let g1 = gate.start();
        let g2 = gate.start();
        assert_eq!(gate.running(), 2);
        drop(g1);
        assert_eq!(gate.running(), 1);
        drop(g2);
        assert_eq!(gate.running(), 0);
    }

    #[tokio::test]
    async fn wait_returns_when_task_finishes() {
        let gate = Arc::new(Gate::new());
        let guard = gate.start();
        let generation = gate.view().generation;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        let abort = CancellationToken::new();
        gate.wait_past(generation, &abort).await;
        assert_eq!(gate.running(), 0);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_returns_on_abort() {
        let gate = Gate::new();
        let generation = gate.view().generation;
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        gate.wait_past(generation, &abort).await;
        assert!(abort.is_cancelled());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_does_not_miss_earlier_change() {
        let gate = Arc::new(Gate::new());
        let generation = gate.view().generation;
        drop(gate.start());
        // Both changes happened before waiting; must return immediately.
        let abort = CancellationToken::new();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_past(generation, &abort))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn guard_released_when_task_panics() {
        let gate = Arc::new(Gate::new());
        let guard = gate.start();
        let boom = true;
        let result = tokio::spawn(async move {
            let _guard = guard;
            assert!(!boom, "plan blew up");
            0_u8
        })
        .await;
        assert!(result.unwrap_err().is_panic());
        assert_eq!(gate.running(), 0);
    }
}
