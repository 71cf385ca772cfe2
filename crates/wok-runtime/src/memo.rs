//! Record of the route and params last served per header.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// One remembered header value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoEntry {
    /// Header name as given by the caller.
    pub header: String,
    /// Encoded route and params.
    pub value: String,
}

#[derive(Debug)]
struct Slot {
    entry: MemoEntry,
    released: CancellationToken,
}

/// Route memo scoped to a request context.
///
/// Entries disappear when the context they were remembered under ends.
#[derive(Clone, Debug, Default)]
pub struct RouteMemo {
    entries: Arc<Mutex<IndexMap<u64, Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl RouteMemo {
    /// Empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `value` under `header` until `until` is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn remember(&self, header: &str, value: String, until: &CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let released = CancellationToken::new();
        let _ = self.entries.lock().insert(
            id,
            Slot {
                entry: MemoEntry {
                    header: header.to_string(),
                    value,
                },
                released: released.clone(),
            },
        );

        let entries = Arc::clone(&self.entries);
        let token = until.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    let _ = entries.lock().shift_remove(&id);
                }
                () = released.cancelled() => {}
            }
        }));
        id
    }

    /// Drop the entry `id` before its context ends.
    pub fn forget(&self, id: u64) {
        if let Some(slot) = self.entries.lock().shift_remove(&id) {
            slot.released.cancel();
        }
    }

    /// Most recent live value for `header` (case-insensitive).
    pub fn latest(&self, header: &str) -> Option<String> {
        self.entries
            .lock()
            .values()
            .rev()
            .find(|slot| slot.entry.header.eq_ignore_ascii_case(header))
            .map(|slot| slot.entry.value.clone())
    }

    /// Live entries, oldest first.
    pub fn entries(&self) -> Vec<MemoEntry> {
        self.entries
            .lock()
            .values()
            .map(|slot| slot.entry.clone())
            .collect()
    }
}
