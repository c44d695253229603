//! Request-scoped caching.
//!
//! # Data Flow
//! ```text
//! inbound request starts → new RequestCache (the scope)
//!     → get_or_compute(key, compute)
//!         hit       → stored value, compute never runs
//!         in flight → await the one running compute (single-flight)
//!         miss      → run compute, store, return
//! inbound request ends → scope dropped, entries discarded
//! ```
//!
//! # Design Decisions
//! - Entries are `OnceCell`s so concurrent callers share one computation
//! - Nothing outlives the scope; there is no TTL
//! - Explicit invalidation by key or for the whole scope

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::observability::metrics;

/// Memoisation for a single logical request.
#[derive(Debug)]
pub struct RequestCache<V> {
    entries: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V> Default for RequestCache<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<V>> {
        if let Some(cell) = self.entries.get(key) {
            return cell.clone();
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone()
    }

    /// Return the value for `key`, computing it at most once per scope.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.get_or_compute_if(key, compute, |_| true).await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but a freshly computed
    /// value for which `keep` is false is dropped from the scope after being
    /// handed to every caller already waiting on it.
    pub async fn get_or_compute_if<F, Fut, K>(&self, key: &str, compute: F, keep: K) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
        K: Fn(&V) -> bool,
    {
        let cell = self.cell(key);
        if let Some(value) = cell.get() {
            metrics::record_cache_hit();
            tracing::trace!(cache_key = %key, "Request cache hit");
            return value.clone();
        }

        let mut computed = false;
        let value = cell
            .get_or_init(|| {
                computed = true;
                compute()
            })
            .await
            .clone();

        if computed && !keep(&value) {
            self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        }
        value
    }

    /// Stored value, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Evict one key. Returns true if something was stored.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            tracing::debug!(cache_key = %key, "Request cache entry invalidated");
        }
        removed
    }

    /// Evict everything in the scope.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_computes_once() {
        let cache = RequestCache::new();
        let calls = AtomicUsize::new(0);

        let a = cache
            .get_or_compute("user:12", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "Hello World".to_string()
            })
            .await;
        let b = cache
            .get_or_compute("user:12", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "other".to_string()
            })
            .await;

        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_single_flight() {
        let cache = Arc::new(RequestCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute("k", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            42u32
                        })
                        .await
                })
            })
            .collect();

        for t in tasks {
            assert_eq!(t.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = RequestCache::new();
        cache.get_or_compute("a", || async { 1 }).await;
        cache.get_or_compute("b", || async { 2 }).await;

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get_or_compute("a", || async { 3 }).await, 3);
        assert_eq!(cache.get("b"), Some(2));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_values_not_kept() {
        let cache: RequestCache<Result<u32, String>> = RequestCache::new();
        let first = cache
            .get_or_compute_if("k", || async { Err("down".to_string()) }, |v| v.is_ok())
            .await;
        assert!(first.is_err());
        assert!(cache.get("k").is_none());

        let second = cache
            .get_or_compute_if("k", || async { Ok(5) }, |v| v.is_ok())
            .await;
        assert_eq!(second, Ok(5));
        assert_eq!(cache.get("k"), Some(Ok(5)));
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let first = RequestCache::new();
        let second = RequestCache::new();
        first.get_or_compute("k", || async { 1 }).await;
        assert_eq!(second.get_or_compute("k", || async { 2 }).await, 2);
    }
}
