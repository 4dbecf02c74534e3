use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::request::Response;

/// Completion callback for one in-flight request. Consumed exactly once:
/// by the matching reply, or by timeout expiry, whichever comes first.
pub type ReplyCallback = Box<dyn FnOnce(Response) + Send>;

struct Pending {
    callback: ReplyCallback,
    /// `None` means wait forever (caller passed `timeout_ms == 0`).
    deadline: Option<Instant>,
}

/// Correlation table for in-flight requests.
///
/// Lock discipline: the inner mutex is held only for map mutation; a
/// callback is always invoked after the entry has been removed and the
/// lock released.
pub struct PendingTable {
    inner: Mutex<HashMap<u32, Pending>>,
    next_id: AtomicU32,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate the next correlation id. Monotonic, never 0 — the wire
    /// reserves 0 for unsolicited frames.
    pub fn alloc_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a request. `timeout_ms == 0` disables expiry.
    pub fn insert(&self, corr_id: u32, callback: ReplyCallback, timeout_ms: u32) {
        let deadline = match timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(u64::from(ms))),
        };
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(corr_id, Pending { callback, deadline });
    }

    /// Remove and return the callback for `corr_id`, if still pending.
    pub fn take(&self, corr_id: u32) -> Option<ReplyCallback> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(&corr_id).map(|p| p.callback)
    }

    /// Remove a just-registered entry after a failed send, so no orphaned
    /// callback can ever fire.
    pub fn cancel(&self, corr_id: u32) {
        let _ = self.take(corr_id);
    }

    /// Remove every entry whose deadline has passed. Callbacks are returned,
    /// not invoked, so the caller fires them outside the lock.
    pub fn expire(&self, now: Instant) -> Vec<(u32, ReplyCallback)> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let overdue: Vec<u32> = map
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| now >= d))
            .map(|(&id, _)| id)
            .collect();
        overdue
            .into_iter()
            .filter_map(|id| map.remove(&id).map(|p| (id, p.callback)))
            .collect()
    }

    /// Drain every entry regardless of deadline, for shutdown.
    pub fn drain_all(&self) -> Vec<(u32, ReplyCallback)> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.drain().map(|(id, p)| (id, p.callback)).collect()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn ids_are_monotonic_and_nonzero() {
        let table = PendingTable::new();
        let a = table.alloc_id();
        let b = table.alloc_id();
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[test]
    fn id_allocation_skips_zero_on_wrap() {
        let table = PendingTable::new();
        table.next_id.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(table.alloc_id(), u32::MAX);
        assert_ne!(table.alloc_id(), 0);
    }

    #[test]
    fn take_consumes_exactly_once() {
        let table = PendingTable::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        table.insert(3, Box::new(move |_| { f.fetch_add(1, Ordering::SeqCst); }), 0);

        let cb = table.take(3).expect("entry should exist");
        cb(Response::timed_out(3));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(table.take(3).is_none());
    }

    #[test]
    fn expiry_honors_deadlines() {
        let table = PendingTable::new();
        table.insert(1, Box::new(|_| {}), 10);
        table.insert(2, Box::new(|_| {}), 0); // infinite

        let later = Instant::now() + Duration::from_millis(50);
        let expired = table.expire(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cancel_removes_silently() {
        let table = PendingTable::new();
        table.insert(9, Box::new(|_| panic!("must never fire")), 0);
        table.cancel(9);
        assert!(table.is_empty());
        assert!(table.expire(Instant::now() + Duration::from_secs(60)).is_empty());
    }
}
