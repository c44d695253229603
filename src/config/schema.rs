//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::collapser::CollapserConfig;
use crate::load_balancer::RuleKind;
use crate::resilience::CircuitBreakerConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Logical services and their endpoints.
    pub services: Vec<ServiceConfig>,

    /// Endpoint selection settings.
    pub load_balancer: LoadBalancerConfig,

    /// Circuit breaker defaults and per-command overrides.
    pub breaker: BreakerConfig,

    /// Request collapsing defaults.
    pub collapser: CollapserConfig,

    /// Gateway route table.
    pub routes: Vec<RouteConfig>,

    /// Gateway filter settings.
    pub gateway: GatewaySettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// One logical service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Logical name used by callers and routes.
    pub name: String,

    /// `host:port` entries.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Rule override for this service.
    #[serde(default)]
    pub rule: Option<RuleKind>,
}

/// Load balancer defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Rule used by services without an override.
    pub rule: RuleKind,

    /// Re-picks allowed by the retry rule before giving up.
    pub retry_attempts: usize,

    /// Consecutive failed calls before an endpoint is skipped by the retry rule.
    pub unhealthy_threshold: usize,

    /// Consecutive successful calls before it is used again.
    pub healthy_threshold: usize,

    /// Wait before an unhealthy endpoint is offered a trial call.
    pub unhealthy_cooldown_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            rule: RuleKind::RoundRobin,
            retry_attempts: 3,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            unhealthy_cooldown_ms: 5_000,
        }
    }
}

/// Breaker defaults plus overrides keyed by `service:command`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BreakerConfig {
    #[serde(flatten)]
    pub defaults: CircuitBreakerConfig,

    /// Per-command settings; unset fields inherit the section defaults.
    pub commands: HashMap<String, BreakerOverride>,

    /// Breakers unused this long are dropped. 0 disables eviction.
    pub idle_eviction_secs: u64,
}

impl BreakerConfig {
    /// Overrides resolved against the section defaults, keyed by `service:command`.
    pub fn command_configs(&self) -> HashMap<String, CircuitBreakerConfig> {
        self.commands
            .iter()
            .map(|(key, over)| (key.clone(), over.apply(&self.defaults)))
            .collect()
    }
}

/// A partial breaker config for one command.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BreakerOverride {
    pub request_volume_threshold: Option<u64>,
    pub error_threshold_percentage: Option<u32>,
    pub rolling_window_ms: Option<u64>,
    pub buckets: Option<usize>,
    pub sleep_window_ms: Option<u64>,
    pub max_sleep_window_ms: Option<u64>,
    pub exponential_backoff: Option<bool>,
    pub half_open_max_calls: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub ignored_error_kinds: Option<Vec<String>>,
}

impl BreakerOverride {
    pub fn apply(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            request_volume_threshold: self.request_volume_threshold.unwrap_or(base.request_volume_threshold),
            error_threshold_percentage: self.error_threshold_percentage.unwrap_or(base.error_threshold_percentage),
            rolling_window_ms: self.rolling_window_ms.unwrap_or(base.rolling_window_ms),
            buckets: self.buckets.unwrap_or(base.buckets),
            sleep_window_ms: self.sleep_window_ms.unwrap_or(base.sleep_window_ms),
            max_sleep_window_ms: self.max_sleep_window_ms.unwrap_or(base.max_sleep_window_ms),
            exponential_backoff: self.exponential_backoff.unwrap_or(base.exponential_backoff),
            half_open_max_calls: self.half_open_max_calls.unwrap_or(base.half_open_max_calls),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            ignored_error_kinds: self
                .ignored_error_kinds
                .clone()
                .unwrap_or_else(|| base.ignored_error_kinds.clone()),
        }
    }
}

/// Maps a path prefix to a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match, e.g. "/user".
    pub path_prefix: String,

    /// Target service name.
    pub service: String,

    /// Remove the prefix before forwarding.
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: bool,
}

fn default_strip_prefix() -> bool {
    true
}

/// Gateway filter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Enable the access token filter.
    pub require_access_token: bool,

    /// Query parameter carrying the access token.
    pub access_token_param: String,

    /// Path prefixes the access token filter does not apply to.
    pub exempt_paths: Vec<String>,

    /// Status returned when a routed call degrades to the fallback.
    pub fallback_status: u16,

    /// Maximum request/response body size buffered, in bytes.
    pub max_body_bytes: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            require_access_token: true,
            access_token_param: "accessToken".to_string(),
            exempt_paths: Vec::new(),
            fallback_status: 503,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for one inbound request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.breaker.defaults, CircuitBreakerConfig::default());
        assert_eq!(config.collapser.window_ms, 10);
        assert_eq!(config.gateway.access_token_param, "accessToken");
        assert_eq!(config.gateway.fallback_status, 503);
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[services]]
            name = "user"
            endpoints = ["127.0.0.1:8001", "127.0.0.1:8002"]
            rule = "random"

            [breaker]
            request_volume_threshold = 10
            timeout_ms = 2000

            [breaker.commands."user:findOrder"]
            timeout_ms = 500

            [[routes]]
            path_prefix = "/user"
            service = "user"
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.services[0].rule, Some(RuleKind::Random));
        assert_eq!(config.breaker.defaults.request_volume_threshold, 10);
        assert_eq!(config.breaker.defaults.timeout_ms, 2000);
        assert!(config.routes[0].strip_prefix);

        let resolved = config.breaker.command_configs();
        let find_order = &resolved["user:findOrder"];
        assert_eq!(find_order.timeout_ms, 500);
        assert_eq!(find_order.request_volume_threshold, 10);
        assert_eq!(find_order.sleep_window_ms, CircuitBreakerConfig::default().sleep_window_ms);
    }

    #[test]
    fn test_override_inherits_section_defaults() {
        let raw = r#"
            [breaker]
            request_volume_threshold = 4
            ignored_error_kinds = ["bad_request"]

            [breaker.commands."user:find"]
            timeout_ms = 250

            [breaker.commands."user:save"]
            request_volume_threshold = 40
            ignored_error_kinds = []
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        let resolved = config.breaker.command_configs();

        assert_eq!(
            resolved["user:find"],
            CircuitBreakerConfig {
                timeout_ms: 250,
                ..config.breaker.defaults.clone()
            }
        );
        assert_eq!(resolved["user:save"].request_volume_threshold, 40);
        assert!(resolved["user:save"].ignored_error_kinds.is_empty());
        assert_eq!(resolved["user:save"].timeout_ms, config.breaker.defaults.timeout_ms);
    }
}
