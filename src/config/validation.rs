//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (percentages, timeouts, bucket layout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::load_balancer::Endpoint;
use crate::resilience::CircuitBreakerConfig;

/// One semantic problem, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let field = format!("services[{}]", i);
        if service.name.is_empty() {
            errors.push(ValidationError::new(&field, "name is empty"));
        }
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate service '{}'", service.name)));
        }
        for raw in &service.endpoints {
            if let Err(e) = raw.parse::<Endpoint>() {
                errors.push(ValidationError::new(format!("{}.endpoints", field), e.to_string()));
            }
        }
    }

    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(&field, "path_prefix must start with '/'"));
        }
        if !names.contains(route.service.as_str()) {
            errors.push(ValidationError::new(&field, format!("unknown service '{}'", route.service)));
        }
    }

    if config.load_balancer.unhealthy_threshold == 0 || config.load_balancer.healthy_threshold == 0 {
        errors.push(ValidationError::new("load_balancer", "health thresholds must be > 0"));
    }

    validate_breaker("breaker", &config.breaker.defaults, &mut errors);
    let mut commands: Vec<_> = config.breaker.command_configs().into_iter().collect();
    commands.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, cfg) in &commands {
        let field = format!("breaker.commands.\"{}\"", key);
        if key.split_once(':').map_or(true, |(s, c)| s.is_empty() || c.is_empty()) {
            errors.push(ValidationError::new(&field, "key must be 'service:command'"));
        }
        validate_breaker(&field, cfg, &mut errors);
    }

    if config.collapser.max_batch_size == 0 {
        errors.push(ValidationError::new("collapser.max_batch_size", "must be > 0"));
    }

    if !(100..=599).contains(&config.gateway.fallback_status) {
        errors.push(ValidationError::new("gateway.fallback_status", "not an HTTP status code"));
    }
    if config.gateway.access_token_param.is_empty() {
        errors.push(ValidationError::new("gateway.access_token_param", "must not be empty"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(field: &str, cfg: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if !(1..=100).contains(&cfg.error_threshold_percentage) {
        errors.push(ValidationError::new(
            format!("{}.error_threshold_percentage", field),
            "must be within 1..=100",
        ));
    }
    if cfg.buckets == 0 || cfg.rolling_window_ms % cfg.buckets as u64 != 0 {
        errors.push(ValidationError::new(
            format!("{}.buckets", field),
            "must be > 0 and divide rolling_window_ms",
        ));
    }
    if cfg.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
    }
    if cfg.sleep_window_ms == 0 {
        errors.push(ValidationError::new(format!("{}.sleep_window_ms", field), "must be > 0"));
    }
    if cfg.half_open_max_calls == 0 {
        errors.push(ValidationError::new(format!("{}.half_open_max_calls", field), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BreakerOverride, RouteConfig, ServiceConfig};

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "user".into(),
            endpoints: vec!["127.0.0.1:8001".into()],
            rule: None,
        });
        config.routes.push(RouteConfig {
            path_prefix: "/user".into(),
            service: "user".into(),
            strip_prefix: true,
        });
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_bad_endpoint_and_duplicate_service() {
        let mut config = valid();
        config.services.push(ServiceConfig {
            name: "user".into(),
            endpoints: vec!["no-port".into()],
            rule: None,
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
        assert!(errors.iter().any(|e| e.field == "services[1].endpoints"));
    }

    #[test]
    fn test_breaker_ranges() {
        let mut config = valid();
        config.breaker.defaults.buckets = 3;
        config.breaker.commands.insert(
            "nocolon".into(),
            BreakerOverride {
                timeout_ms: Some(0),
                ..BreakerOverride::default()
            },
        );
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"breaker.buckets"));
        assert!(fields.contains(&"breaker.commands.\"nocolon\""));
        assert!(fields.contains(&"breaker.commands.\"nocolon\".timeout_ms"));
    }
}
