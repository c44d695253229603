//! Request collapsing.
//!
//! # Data Flow
//! ```text
//! collapse(key)
//!     → key already being fetched: wait on that fetch
//!     → no open batch: create one, arm the window timer
//!     → register a waiter for key in the open batch
//!     → window elapsed or max_batch_size distinct keys reached
//!         → batch taken out (exactly once), its keys move to in-flight
//!         → new callers start a new batch
//!         → batch_fetch(distinct keys) in its own task
//!         → each waiter receives its key's entry, keys leave in-flight
//! ```
//!
//! # Design Decisions
//! - At most one fetch per key at a time: a key stays in-flight until its
//!   batch completes, and late callers for it join that batch
//! - The flush runs detached from every caller: a waiter that gives up only
//!   stops listening, the shared batch still completes for the others
//! - Whole-batch failure fails every waiter with the same `BatchFailure`,
//!   except errors that bypass fallbacks, which reach the waiters unchanged
//! - A key missing from the returned mapping fails only its own waiters

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{RpcError, RpcResult};
use crate::observability::metrics;

/// Collapser configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CollapserConfig {
    /// Batching window in milliseconds, measured from the first request.
    pub window_ms: u64,

    /// Distinct keys that force an early flush.
    pub max_batch_size: usize,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            window_ms: 10,
            max_batch_size: 100,
        }
    }
}

/// Per-key results of one batch call.
pub type BatchResults<K, V> = HashMap<K, RpcResult<V>>;

/// The batched downstream call.
pub type BatchFetch<K, V> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, RpcResult<BatchResults<K, V>>> + Send + Sync>;

type Waiters<K, V> = HashMap<K, Vec<oneshot::Sender<RpcResult<V>>>>;

struct Batch<K, V> {
    id: u64,
    waiters: Waiters<K, V>,
}

struct State<K, V> {
    next_id: u64,
    open: Option<Batch<K, V>>,
    /// Keys of batches taken out but not yet answered.
    inflight: Waiters<K, V>,
}

struct Shared<K, V> {
    name: String,
    config: CollapserConfig,
    fetch: BatchFetch<K, V>,
    state: Mutex<State<K, V>>,
}

/// Merges near-simultaneous single-key lookups into one batched call.
pub struct Collapser<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Collapser<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Collapser<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collapser")
            .field("name", &self.shared.name)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<K, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    /// Close the open batch and move its waiters to in-flight.
    fn take_open(&mut self) -> Option<(u64, Vec<K>)> {
        let batch = self.open.take()?;
        let keys: Vec<K> = batch.waiters.keys().cloned().collect();
        for (key, senders) in batch.waiters {
            self.inflight.entry(key).or_default().extend(senders);
        }
        Some((batch.id, keys))
    }
}

impl<K, V> Collapser<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(name: impl Into<String>, config: CollapserConfig, fetch: BatchFetch<K, V>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                fetch,
                state: Mutex::new(State {
                    next_id: 0,
                    open: None,
                    inflight: HashMap::new(),
                }),
            }),
        }
    }

    /// Convenience constructor from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, config: CollapserConfig, fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = RpcResult<BatchResults<K, V>>> + Send + 'static,
    {
        let fetch: BatchFetch<K, V> =
            Arc::new(move |keys| -> BoxFuture<'static, RpcResult<BatchResults<K, V>>> { Box::pin(fetch(keys)) });
        Self::new(name, config, fetch)
    }

    /// Queue `key` into the current batch and wait for its result.
    pub async fn collapse(&self, key: K) -> RpcResult<V> {
        let rx = self.enqueue(key);
        rx.await
            .unwrap_or_else(|_| Err(RpcError::BatchFailure("batch dropped before completion".into())))
    }

    fn enqueue(&self, key: K) -> oneshot::Receiver<RpcResult<V>> {
        let (tx, rx) = oneshot::channel();
        let shared = &self.shared;
        let mut state = shared.lock();

        if let Some(waiters) = state.inflight.get_mut(&key) {
            waiters.push(tx);
            tracing::trace!(collapser = %shared.name, key = ?key, "Joined in-flight fetch");
            return rx;
        }

        if state.open.is_none() {
            let id = state.next_id;
            state.next_id += 1;
            state.open = Some(Batch {
                id,
                waiters: HashMap::new(),
            });
            self.arm_timer(id);
            tracing::trace!(collapser = %shared.name, batch = id, "Opened batch");
        }

        let ready = match state.open.as_mut() {
            Some(batch) => {
                batch.waiters.entry(key).or_default().push(tx);
                batch.waiters.len() >= shared.config.max_batch_size.max(1)
            }
            None => false,
        };

        let full = if ready { state.take_open() } else { None };
        drop(state);

        if let Some((id, keys)) = full {
            tracing::debug!(collapser = %shared.name, batch = id, "Batch full, flushing early");
            tokio::spawn(Self::flush(shared.clone(), id, keys));
        }
        rx
    }

    fn arm_timer(&self, id: u64) {
        let shared = self.shared.clone();
        let window = Duration::from_millis(shared.config.window_ms);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let batch = {
                let mut state = shared.lock();
                // Already flushed on size when the id moved on.
                if state.open.as_ref().is_some_and(|open| open.id == id) {
                    state.take_open()
                } else {
                    None
                }
            };
            if let Some((id, keys)) = batch {
                Self::flush(shared, id, keys).await;
            }
        });
    }

    async fn flush(shared: Arc<Shared<K, V>>, id: u64, keys: Vec<K>) {
        tracing::debug!(collapser = %shared.name, batch = id, keys = keys.len(), "Flushing batch");
        metrics::record_batch(&shared.name, keys.len());

        let outcome = (shared.fetch)(keys.clone()).await;

        let waiters: Vec<(K, Vec<oneshot::Sender<RpcResult<V>>>)> = {
            let mut state = shared.lock();
            keys.into_iter()
                .filter_map(|key| state.inflight.remove(&key).map(|senders| (key, senders)))
                .collect()
        };

        match outcome {
            Ok(mut results) => {
                for (key, senders) in waiters {
                    let result = results.remove(&key).unwrap_or_else(|| {
                        Err(RpcError::BatchFailure(format!("no result for key {:?}", key)))
                    });
                    for tx in senders {
                        // A waiter that went away is fine.
                        let _ = tx.send(result.clone());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(collapser = %shared.name, batch = id, error = %err, "Batch call failed");
                let failure = match err {
                    hard if hard.is_hard() => hard,
                    RpcError::BatchFailure(msg) => RpcError::BatchFailure(msg),
                    other => RpcError::BatchFailure(other.to_string()),
                };
                for tx in waiters.into_iter().flat_map(|(_, senders)| senders) {
                    let _ = tx.send(Err(failure.clone()));
                }
            }
        }
    }
}
