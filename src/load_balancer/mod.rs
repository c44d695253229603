//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! select(service)
//!     → discovery resolver (current endpoint list, possibly stale)
//!     → rule for the service (per-service override or default):
//!         - round_robin.rs (rotate through endpoints)
//!         - random.rs (uniform pick)
//!         - retry.rs (re-pick until a healthy endpoint, bounded)
//!     → Endpoint or NoEndpointsAvailable
//! ```
//!
//! # Design Decisions
//! - Empty resolver answer fails fast; this layer never retries it
//! - Endpoint health comes from call outcomes (endpoint.rs), not the registry
//! - Rules are shared across callers; their state is atomic

pub mod endpoint;
pub mod random;
pub mod retry;
pub mod round_robin;

use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::discovery::EndpointResolver;
use crate::error::{RpcError, RpcResult};
pub use endpoint::{Endpoint, HealthRegistry, HealthState};

/// A selection strategy.
pub trait LoadBalancerRule: Send + Sync + Debug {
    /// Rule name for logs.
    fn name(&self) -> &'static str;

    /// Pick one endpoint, or `None` when nothing is selectable.
    fn choose(&self, service: &str, endpoints: &[Endpoint], health: &HealthRegistry) -> Option<Endpoint>;
}

/// Configurable rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    RoundRobin,
    Random,
    /// Round-robin wrapped in a bounded retry over unhealthy endpoints.
    Retry,
}

impl RuleKind {
    /// Build a fresh rule instance.
    pub fn build(self, retry_attempts: usize) -> Box<dyn LoadBalancerRule> {
        match self {
            RuleKind::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            RuleKind::Random => Box::new(random::RandomRule::new()),
            RuleKind::Retry => Box::new(retry::RetryRule::new(
                Box::new(round_robin::RoundRobin::new()),
                retry_attempts,
            )),
        }
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RuleKind::RoundRobin),
            "random" => Ok(RuleKind::Random),
            "retry" => Ok(RuleKind::Retry),
            other => Err(format!("unknown load balancer rule '{}'", other)),
        }
    }
}

/// Selects one endpoint per call.
#[derive(Debug)]
pub struct LoadBalancer {
    resolver: Arc<dyn EndpointResolver>,
    default_rule: Box<dyn LoadBalancerRule>,
    service_rules: HashMap<String, Box<dyn LoadBalancerRule>>,
    health: Arc<HealthRegistry>,
}

impl LoadBalancer {
    pub fn new(resolver: Arc<dyn EndpointResolver>, rule: Box<dyn LoadBalancerRule>) -> Self {
        Self {
            resolver,
            default_rule: rule,
            service_rules: HashMap::new(),
            health: Arc::new(HealthRegistry::default()),
        }
    }

    /// Use a specific rule for one service.
    pub fn with_service_rule(mut self, service: impl Into<String>, rule: Box<dyn LoadBalancerRule>) -> Self {
        self.service_rules.insert(service.into(), rule);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = health;
        self
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    fn rule_for(&self, service: &str) -> &dyn LoadBalancerRule {
        self.service_rules
            .get(service)
            .map(|r| r.as_ref())
            .unwrap_or(self.default_rule.as_ref())
    }

    /// Select an endpoint for the service.
    pub fn select(&self, service: &str) -> RpcResult<Endpoint> {
        let endpoints = self.resolver.resolve(service);
        if endpoints.is_empty() {
            tracing::debug!(service = %service, "Resolver returned no endpoints");
            return Err(RpcError::NoEndpointsAvailable(service.to_string()));
        }

        let rule = self.rule_for(service);
        match rule.choose(service, &endpoints, &self.health) {
            Some(endpoint) => {
                tracing::trace!(service = %service, rule = rule.name(), endpoint = %endpoint, "Endpoint selected");
                Ok(endpoint)
            }
            None => {
                tracing::debug!(
                    service = %service,
                    rule = rule.name(),
                    endpoint_count = endpoints.len(),
                    "No selectable endpoint"
                );
                Err(RpcError::NoEndpointsAvailable(service.to_string()))
            }
        }
    }

    /// Feed a call outcome back into endpoint health.
    pub fn report(&self, endpoint: &Endpoint, success: bool) {
        if success {
            self.health.record_success(endpoint);
        } else {
            self.health.record_failure(endpoint);
        }
    }
}
