//! Random load balancing strategy.

use rand::Rng;

use crate::load_balancer::{endpoint::Endpoint, HealthRegistry, LoadBalancerRule};

/// Uniform random selector.
/// The range is taken from the slice handed in on every call, so the
/// distribution stays uniform when the endpoint set grows or shrinks.
#[derive(Debug, Default)]
pub struct RandomRule;

impl RandomRule {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancerRule for RandomRule {
    fn name(&self) -> &'static str {
        "random"
    }

    fn choose(&self, _service: &str, endpoints: &[Endpoint], _health: &HealthRegistry) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        Some(endpoints[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_random_covers_all() {
        let rule = RandomRule::new();
        let health = HealthRegistry::default();
        let eps: Vec<_> = (0..4).map(|i| Endpoint::new("127.0.0.1", 9000 + i)).collect();

        let mut hits: HashMap<u16, usize> = HashMap::new();
        for _ in 0..4000 {
            let ep = rule.choose("svc", &eps, &health).unwrap();
            *hits.entry(ep.port).or_default() += 1;
        }
        assert_eq!(hits.len(), 4);
        // Loose bound; expected 1000 each.
        assert!(hits.values().all(|&n| n > 700 && n < 1300), "{:?}", hits);
    }

    #[test]
    fn test_random_follows_set_size() {
        let rule = RandomRule::new();
        let health = HealthRegistry::default();
        let one = vec![Endpoint::new("127.0.0.1", 1)];
        for _ in 0..10 {
            assert_eq!(rule.choose("svc", &one, &health).unwrap().port, 1);
        }
        assert!(rule.choose("svc", &[], &health).is_none());
    }
}
