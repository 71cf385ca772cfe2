//! Reference-counted, insertion-ordered set of loaded dependency keys.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct DedupeState {
    client_loaded: HashSet<String>,
    counts: IndexMap<String, usize>,
}

/// Keys materialized once per session until every loader's context ends.
///
/// Keys the client reported as already loaded are never materialized.
#[derive(Clone, Debug, Default)]
pub struct Deduper {
    inner: Arc<Mutex<DedupeState>>,
}

impl Deduper {
    /// Empty deduper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduper that ignores keys the client already has.
    pub fn with_client_loaded<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = DedupeState {
            client_loaded: keys.into_iter().map(Into::into).collect(),
            counts: IndexMap::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Mark `key` as needed until `until` is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(&self, key: &str, until: &CancellationToken) {
        {
            let mut state = self.inner.lock();
            if state.client_loaded.contains(key) {
                debug!(key, "dependency already loaded by client");
                return;
            }
            *state.counts.entry(key.to_string()).or_insert(0) += 1;
        }

        let this = self.clone();
        let token = until.clone();
        let key = key.to_string();
        drop(tokio::spawn(async move {
            token.cancelled().await;
            this.release(&key);
        }));
    }

    fn release(&self, key: &str) {
        let mut state = self.inner.lock();
        if let Some(count) = state.counts.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                let _ = state.counts.shift_remove(key);
                debug!(key, "dependency released");
            }
        }
    }

    /// Loaded keys in first-inserted order.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().counts.keys().cloned().collect()
    }

    /// Whether `key` is currently loaded.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.inner.lock().counts.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn refcount_survives_partial_release() {
        let deduper = Deduper::new();
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        for t in &tokens {
            deduper.load("x", t);
        }
        assert_eq!(deduper.snapshot(), ["x"]);

        tokens[0].cancel();
        tokens[1].cancel();
        settle().await;
        assert!(deduper.is_loaded("x"));

        tokens[2].cancel();
        settle().await;
        assert!(!deduper.is_loaded("x"));
        assert!(deduper.snapshot().is_empty());
    }

    #[tokio::test]
    async fn snapshot_keeps_first_insert_order() {
        let deduper = Deduper::new();
        let t = CancellationToken::new();
        deduper.load("b", &t);
        deduper.load("a", &t);
        deduper.load("b", &t);
        assert_eq!(deduper.snapshot(), ["b", "a"]);
    }

    #[tokio::test]
    async fn evicted_key_reinserts_at_tail() {
        let deduper = Deduper::new();
        let short = CancellationToken::new();
        let long = CancellationToken::new();
        deduper.load("b", &short);
        deduper.load("a", &long);
        short.cancel();
        settle().await;
        deduper.load("b", &long);
        assert_eq!(deduper.snapshot(), ["a", "b"]);
    }

    #[tokio::test]
    async fn client_loaded_keys_are_skipped() {
        let deduper = Deduper::with_client_loaded(["css"]);
        let t = CancellationToken::new();
        deduper.load("css", &t);
        deduper.load("js", &t);
        assert_eq!(deduper.snapshot(), ["js"]);
    }

    #[tokio::test]
    async fn parent_cancellation_releases_children() {
        let deduper = Deduper::new();
        let parent = CancellationToken::new();
        deduper.load("x", &parent.child_token());
        parent.cancel();
        settle().await;
        assert!(!deduper.is_loaded("x"));
    }
}
