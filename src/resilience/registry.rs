//! Process-wide breaker registry keyed by (service, command).

use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};

/// Identity of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub service: String,
    pub command: String,
}

impl BreakerKey {
    pub fn new(service: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.command)
    }
}

/// Breakers are created on first use and live until explicitly evicted.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<BreakerKey, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    /// Overrides keyed by `service:command`.
    overrides: HashMap<String, CircuitBreakerConfig>,
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, CircuitBreakerConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    fn config_for(&self, key: &BreakerKey) -> CircuitBreakerConfig {
        self.overrides
            .get(&key.to_string())
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Get or create the breaker for `key`.
    pub fn get(&self, key: &BreakerKey) -> Arc<CircuitBreaker> {
        if let Some(cb) = self.breakers.get(key) {
            return cb.clone();
        }
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key.to_string(), self.config_for(key))))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Drop breakers unused for at least `max_idle`. Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.breakers.len();
        self.breakers.retain(|key, cb| {
            let keep = cb.idle_for() < max_idle;
            if !keep {
                tracing::debug!(breaker = %key, "Evicting idle circuit breaker");
            }
            keep
        });
        before.saturating_sub(self.breakers.len())
    }

    /// Snapshots sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|r| r.value().snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Evict idle breakers every `max_idle / 2` until shutdown.
pub async fn run_eviction(
    registry: Arc<BreakerRegistry>,
    max_idle: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval((max_idle / 2).max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = registry.evict_idle(max_idle);
                if evicted > 0 {
                    tracing::info!(evicted, remaining = registry.len(), "Evicted idle circuit breakers");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_key_same_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get(&BreakerKey::new("user", "hello"));
        let b = registry.get(&BreakerKey::new("user", "hello"));
        let c = registry.get(&BreakerKey::new("user", "findAll"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "user:findOrder".to_string(),
            CircuitBreakerConfig {
                timeout_ms: 500,
                ..CircuitBreakerConfig::default()
            },
        );
        let registry = BreakerRegistry::default().with_overrides(overrides);
        assert_eq!(registry.get(&BreakerKey::new("user", "findOrder")).config().timeout_ms, 500);
        assert_eq!(registry.get(&BreakerKey::new("user", "hello")).config().timeout_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle() {
        let registry = BreakerRegistry::default();
        registry.get(&BreakerKey::new("user", "old"));
        tokio::time::advance(Duration::from_secs(120)).await;
        let fresh = registry.get(&BreakerKey::new("user", "new"));
        let _ = fresh.execute(async { Ok::<_, crate::error::CallError>(()) }).await;

        assert_eq!(registry.evict_idle(Duration::from_secs(60)), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshots()[0].name, "user:new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_eviction_until_shutdown() {
        let registry = Arc::new(BreakerRegistry::default());
        registry.get(&BreakerKey::new("user", "old"));
        let shutdown = crate::lifecycle::Shutdown::new();
        let task = tokio::spawn(run_eviction(registry.clone(), Duration::from_secs(10), shutdown.subscribe()));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(registry.is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }
}
