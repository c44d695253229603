//! Fixed endpoint table, replaceable at runtime.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::discovery::EndpointResolver;
use crate::load_balancer::Endpoint;

/// Resolver backed by an in-memory table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: ArcSwap<HashMap<String, Vec<Endpoint>>>,
}

impl StaticResolver {
    /// Build from the `[[services]]` config section. Unparseable endpoints are
    /// skipped with a warning (validation rejects them earlier).
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let resolver = Self::default();
        resolver.reload(services);
        resolver
    }

    /// Replace the whole table.
    pub fn reload(&self, services: &[ServiceConfig]) {
        let mut table = HashMap::new();
        for service in services {
            let endpoints: Vec<Endpoint> = service
                .endpoints
                .iter()
                .filter_map(|raw| match raw.parse() {
                    Ok(ep) => Some(ep),
                    Err(e) => {
                        tracing::warn!(service = %service.name, error = %e, "Invalid endpoint");
                        None
                    }
                })
                .collect();
            table.insert(service.name.clone(), endpoints);
        }
        tracing::info!(services = table.len(), "Endpoint table loaded");
        self.table.store(Arc::new(table));
    }

    /// Replace the endpoints of one service.
    pub fn set_service(&self, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        let service = service.into();
        self.table.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(service.clone(), endpoints.clone());
            next
        });
    }

    /// Names of all known services.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.table.load().keys().cloned().collect();
        names.sort();
        names
    }
}

impl EndpointResolver for StaticResolver {
    fn resolve(&self, service: &str) -> Vec<Endpoint> {
        self.table.load().get(service).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::RuleKind;

    fn service(name: &str, endpoints: &[&str]) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            rule: Some(RuleKind::RoundRobin),
        }
    }

    #[test]
    fn test_resolve_and_reload() {
        let resolver = StaticResolver::from_config(&[service("user", &["127.0.0.1:1", "127.0.0.1:2"])]);
        assert_eq!(resolver.resolve("user").len(), 2);
        assert!(resolver.resolve("order").is_empty());

        resolver.reload(&[service("order", &["127.0.0.1:3"])]);
        assert!(resolver.resolve("user").is_empty());
        assert_eq!(resolver.resolve("order"), vec![Endpoint::new("127.0.0.1", 3)]);
    }

    #[test]
    fn test_invalid_endpoint_skipped() {
        let resolver = StaticResolver::from_config(&[service("user", &["nope", "127.0.0.1:2"])]);
        assert_eq!(resolver.resolve("user"), vec![Endpoint::new("127.0.0.1", 2)]);
    }

    #[test]
    fn test_set_service() {
        let resolver = StaticResolver::default();
        resolver.set_service("a", vec![Endpoint::new("h", 1)]);
        resolver.set_service("b", vec![Endpoint::new("h", 2)]);
        assert_eq!(resolver.services(), vec!["a".to_string(), "b".to_string()]);
    }
}
