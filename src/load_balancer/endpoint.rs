//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single network-addressable instance of a service
//! - Track health state as last observed from call outcomes
//!
//! # Design Decisions
//! - Health is owned here, not by the resolver; the resolver may hand back
//!   a stale list and the breaker outcomes decide what is usable
//! - Consecutive thresholds in both directions prevent flapping
//! - An unhealthy endpoint is offered one trial call per cooldown, so it can
//!   report the success that brings it back

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Time an unhealthy endpoint waits before it is offered a trial call.
pub const DEFAULT_UNHEALTHY_COOLDOWN: Duration = Duration::from_secs(5);

/// One network-addressable instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for a URI authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when an endpoint string is not `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint '{0}', expected host:port")]
pub struct ParseEndpointError(pub String);

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseEndpointError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseEndpointError(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Health counters for a single endpoint.
#[derive(Debug)]
pub struct EndpointHealth {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    retry_at: Mutex<Option<Instant>>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            retry_at: Mutex::new(None),
        }
    }
}

impl EndpointHealth {
    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or Unknown.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Healthy, or unhealthy with its cooldown elapsed. Admitting a trial
    /// pushes the next one a full cooldown out.
    pub fn try_admit(&self, cooldown: Duration) -> bool {
        if self.is_healthy() {
            return true;
        }
        let mut retry_at = self.retry_at();
        let now = Instant::now();
        match *retry_at {
            Some(at) if now < at => false,
            _ => {
                *retry_at = Some(now + cooldown);
                true
            }
        }
    }

    fn restart_cooldown(&self, cooldown: Duration) {
        *self.retry_at() = Some(Instant::now() + cooldown);
    }

    fn retry_at(&self) -> MutexGuard<'_, Option<Instant>> {
        self.retry_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report a successful call. Returns true when this flipped the state to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Healthy {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Report a failed call. Returns true when this flipped the state to Unhealthy.
    /// A failure while already unhealthy restarts the cooldown.
    pub fn mark_failure(&self, unhealthy_threshold: usize, cooldown: Duration) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Unhealthy {
            self.restart_cooldown(cooldown);
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.restart_cooldown(cooldown);
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return true;
        }
        false
    }
}

/// Process-wide endpoint health, keyed by endpoint.
#[derive(Debug)]
pub struct HealthRegistry {
    entries: DashMap<Endpoint, Arc<EndpointHealth>>,
    healthy_threshold: usize,
    unhealthy_threshold: usize,
    cooldown: Duration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

impl HealthRegistry {
    pub fn new(healthy_threshold: usize, unhealthy_threshold: usize) -> Self {
        Self {
            entries: DashMap::new(),
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            cooldown: DEFAULT_UNHEALTHY_COOLDOWN,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn entry(&self, endpoint: &Endpoint) -> Arc<EndpointHealth> {
        if let Some(health) = self.entries.get(endpoint) {
            return health.clone();
        }
        self.entries
            .entry(endpoint.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Endpoints never seen are treated as healthy.
    pub fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        self.entries
            .get(endpoint)
            .map(|h| h.is_healthy())
            .unwrap_or(true)
    }

    /// Like `is_healthy`, but lets an unhealthy endpoint through once its
    /// cooldown has elapsed. Used by rules that skip unhealthy endpoints.
    pub fn try_admit(&self, endpoint: &Endpoint) -> bool {
        self.entries
            .get(endpoint)
            .map(|h| h.try_admit(self.cooldown))
            .unwrap_or(true)
    }

    pub fn state(&self, endpoint: &Endpoint) -> HealthState {
        self.entries
            .get(endpoint)
            .map(|h| h.state())
            .unwrap_or(HealthState::Unknown)
    }

    pub fn record_success(&self, endpoint: &Endpoint) {
        if self.entry(endpoint).mark_success(self.healthy_threshold) {
            tracing::info!(endpoint = %endpoint, "Endpoint marked healthy");
        }
    }

    pub fn record_failure(&self, endpoint: &Endpoint) {
        if self.entry(endpoint).mark_failure(self.unhealthy_threshold, self.cooldown) {
            tracing::warn!(endpoint = %endpoint, "Endpoint marked unhealthy");
        }
    }

    /// Snapshot for the admin API.
    pub fn snapshot(&self) -> Vec<(Endpoint, HealthState)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().state()))
            .collect();
        all.sort_by(|a, b| a.0.authority().cmp(&b.0.authority()));
        all
    }
}
