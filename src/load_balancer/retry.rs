//! Retry-capable rule: re-runs an inner rule until it lands on a healthy endpoint.

use crate::load_balancer::{endpoint::Endpoint, HealthRegistry, LoadBalancerRule};

/// Wraps an inner rule. Each attempt consults the inner rule again; the first
/// endpoint the health registry admits wins: healthy, or unhealthy with its
/// cooldown elapsed. Gives up after `max_attempts`, so a fully unhealthy set
/// terminates instead of looping.
#[derive(Debug)]
pub struct RetryRule {
    inner: Box<dyn LoadBalancerRule>,
    max_attempts: usize,
}

impl RetryRule {
    pub fn new(inner: Box<dyn LoadBalancerRule>, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl LoadBalancerRule for RetryRule {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn choose(&self, service: &str, endpoints: &[Endpoint], health: &HealthRegistry) -> Option<Endpoint> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.inner.choose(service, endpoints, health)?;
            if health.try_admit(&candidate) {
                return Some(candidate);
            }
            tracing::debug!(
                service = %service,
                endpoint = %candidate,
                attempt,
                "Skipping unhealthy endpoint"
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::round_robin::RoundRobin;

    #[test]
    fn test_skips_unhealthy() {
        let health = HealthRegistry::new(1, 1);
        let eps = vec![Endpoint::new("a", 1), Endpoint::new("b", 2), Endpoint::new("c", 3)];
        health.record_failure(&eps[0]);

        let rule = RetryRule::new(Box::new(RoundRobin::new()), 3);
        for _ in 0..6 {
            let ep = rule.choose("svc", &eps, &health).unwrap();
            assert_ne!(ep, eps[0]);
        }
    }

    #[test]
    fn test_all_unhealthy_terminates() {
        let health = HealthRegistry::new(1, 1);
        let eps = vec![Endpoint::new("a", 1), Endpoint::new("b", 2)];
        for ep in &eps {
            health.record_failure(ep);
        }

        let rule = RetryRule::new(Box::new(RoundRobin::new()), 5);
        assert!(rule.choose("svc", &eps, &health).is_none());
    }
}
