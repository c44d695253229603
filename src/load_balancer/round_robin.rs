//! Round-robin load balancing strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{endpoint::Endpoint, HealthRegistry, LoadBalancerRule};

/// Round-robin selector.
/// Keeps one rotation counter per service name; the counter advances on every
/// selection whatever the call outcome turns out to be.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, service: &str) -> usize {
        if let Some(counter) = self.counters.get(service) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(service.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl LoadBalancerRule for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn choose(&self, service: &str, endpoints: &[Endpoint], _health: &HealthRegistry) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let index = self.next_index(service) % endpoints.len();
        Some(endpoints[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::new("127.0.0.1", 8080 + i)).collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let health = HealthRegistry::default();
        let eps = endpoints(2);

        let s1 = lb.choose("svc", &eps, &health).unwrap();
        assert_eq!(s1, eps[0]);

        let s2 = lb.choose("svc", &eps, &health).unwrap();
        assert_eq!(s2, eps[1]);

        let s3 = lb.choose("svc", &eps, &health).unwrap();
        assert_eq!(s3, eps[0]);
    }

    #[test]
    fn test_each_endpoint_once_per_cycle() {
        let lb = RoundRobin::new();
        let health = HealthRegistry::default();
        let eps = endpoints(5);

        // Offset the cursor so the window does not start at zero.
        lb.choose("svc", &eps, &health);
        lb.choose("svc", &eps, &health);

        let mut picked: Vec<_> = (0..5)
            .map(|_| lb.choose("svc", &eps, &health).unwrap())
            .collect();
        picked.sort_by_key(|e| e.port);
        assert_eq!(picked, eps);
    }

    #[test]
    fn test_counters_are_per_service() {
        let lb = RoundRobin::new();
        let health = HealthRegistry::default();
        let eps = endpoints(3);

        assert_eq!(lb.choose("a", &eps, &health).unwrap(), eps[0]);
        assert_eq!(lb.choose("a", &eps, &health).unwrap(), eps[1]);
        assert_eq!(lb.choose("b", &eps, &health).unwrap(), eps[0]);
    }

    #[test]
    fn test_empty() {
        let lb = RoundRobin::new();
        assert!(lb.choose("svc", &[], &HealthRegistry::default()).is_none());
    }

    #[test]
    fn test_fair_under_concurrency() {
        let lb = Arc::new(RoundRobin::new());
        let health = Arc::new(HealthRegistry::default());
        let eps = Arc::new(endpoints(4));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = lb.clone();
                let health = health.clone();
                let eps = eps.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| lb.choose("svc", &eps, &health).unwrap().port)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut hits = std::collections::HashMap::new();
        for h in handles {
            for port in h.join().unwrap() {
                *hits.entry(port).or_insert(0) += 1;
            }
        }
        assert!(hits.values().all(|&n| n == 200));
    }
}
