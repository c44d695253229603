//! Circuit breaker for remote command protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls are rejected without touching the network
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume >= request_volume_threshold and
//!                error% >= error_threshold_percentage within the rolling window
//! Open → Half-Open: cooldown elapsed (checked lazily on the next call)
//! Half-Open → Closed: trial succeeds (window reset)
//! Half-Open → Open: trial fails (cooldown grows when exponential_backoff is on)
//! ```
//!
//! # Design Decisions
//! - One breaker per (service, command) key, see registry.rs
//! - The lock is never held across the remote call
//! - Ignored error kinds bypass accounting entirely
//! - A trial slot is released if the caller abandons the call mid-flight

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CallError, RpcError, RpcResult};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_cooldown;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::window::{CallOutcome, HealthCounts, RollingWindow};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Minimum executed calls in the window before the error ratio is considered.
    pub request_volume_threshold: u64,

    /// Error percentage at or above which the breaker trips.
    pub error_threshold_percentage: u32,

    /// Length of the rolling statistics window in milliseconds.
    pub rolling_window_ms: u64,

    /// Number of buckets the window is split into.
    pub buckets: usize,

    /// Cooldown before the first half-open trial, in milliseconds.
    pub sleep_window_ms: u64,

    /// Upper bound for the grown cooldown, in milliseconds.
    pub max_sleep_window_ms: u64,

    /// Grow the cooldown on every failed trial.
    pub exponential_backoff: bool,

    /// Trial calls allowed concurrently while half-open.
    pub half_open_max_calls: u32,

    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,

    /// Error kinds handed back to the caller without tripping the breaker.
    pub ignored_error_kinds: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            rolling_window_ms: 10_000,
            buckets: 10,
            sleep_window_ms: 5_000,
            max_sleep_window_ms: 60_000,
            exponential_backoff: true,
            half_open_max_calls: 1,
            timeout_ms: 1_000,
            ignored_error_kinds: Vec::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    #[serde(flatten)]
    pub counts: HealthCounts,
    pub times_opened: u64,
    /// Milliseconds until the next trial is allowed, when open.
    pub retry_in_ms: Option<u64>,
}

struct Inner {
    state: BreakerState,
    window: RollingWindow,
    next_attempt: Option<Instant>,
    reopens: u32,
    trials_in_flight: u32,
    times_opened: u64,
    last_used: Instant,
}

/// Circuit breaker implementation.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    ignored: HashSet<String>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission ticket for one call. Releases a half-open trial slot on drop
/// unless the outcome was recorded.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            tracing::debug!(breaker = %self.breaker.name, "Half-open trial abandoned");
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::debug!(breaker = %name, config = ?config, "Creating circuit breaker");
        let window = RollingWindow::new(Duration::from_millis(config.rolling_window_ms), config.buckets);
        let ignored = config.ignored_error_kinds.iter().cloned().collect();
        Self {
            name,
            ignored,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window,
                next_attempt: None,
                reopens: 0,
                trials_in_flight: 0,
                times_opened: 0,
                last_used: Instant::now(),
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state. An open breaker whose cooldown elapsed reports
    /// `HalfOpen`, the state the next call will observe.
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match (inner.state, inner.next_attempt) {
            (BreakerState::Open, Some(at)) if Instant::now() >= at => BreakerState::HalfOpen,
            (state, _) => state,
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.lock().last_used.elapsed()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let state = self.state();
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            counts: inner.window.counts(now),
            times_opened: inner.times_opened,
            retry_in_ms: match (state, inner.next_attempt) {
                (BreakerState::Open, Some(at)) => Some(at.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        metrics::record_breaker_transition(&self.name, to.as_str());
        match to {
            BreakerState::Open => tracing::warn!(
                breaker = %self.name,
                from = from.as_str(),
                reopens = inner.reopens,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state changed"
            ),
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        let cooldown = if self.config.exponential_backoff {
            calculate_cooldown(inner.reopens, self.config.sleep_window_ms, self.config.max_sleep_window_ms)
        } else {
            Duration::from_millis(self.config.sleep_window_ms)
        };
        inner.next_attempt = Some(now + cooldown);
        inner.trials_in_flight = 0;
        if inner.reopens == 0 {
            inner.times_opened += 1;
        }
        self.transition(inner, BreakerState::Open);
    }

    fn acquire(&self) -> RpcResult<Permit<'_>> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.last_used = now;

        if inner.state == BreakerState::Open {
            match inner.next_attempt {
                Some(at) if now >= at => {
                    inner.trials_in_flight = 0;
                    self.transition(&mut inner, BreakerState::HalfOpen);
                }
                _ => {
                    inner.window.record(CallOutcome::Rejected, Duration::ZERO, now);
                    return Err(RpcError::CircuitOpenRejected(self.name.clone()));
                }
            }
        }

        let trial = inner.state == BreakerState::HalfOpen;
        if trial {
            if inner.trials_in_flight >= self.config.half_open_max_calls.max(1) {
                inner.window.record(CallOutcome::Rejected, Duration::ZERO, now);
                return Err(RpcError::CircuitOpenRejected(self.name.clone()));
            }
            inner.trials_in_flight += 1;
            tracing::debug!(breaker = %self.name, "Admitting half-open trial call");
        }

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn settle(&self, permit: &mut Permit<'_>, outcome: CallOutcome, latency: Duration) {
        permit.settled = true;
        let now = Instant::now();
        let mut inner = self.lock();

        if permit.trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }

        match (inner.state, outcome) {
            (BreakerState::HalfOpen, CallOutcome::Success) if permit.trial => {
                inner.window.reset();
                inner.reopens = 0;
                inner.next_attempt = None;
                self.transition(&mut inner, BreakerState::Closed);
                inner.window.record(outcome, latency, now);
            }
            (BreakerState::HalfOpen, CallOutcome::Failure | CallOutcome::Timeout) if permit.trial => {
                inner.reopens = inner.reopens.saturating_add(1);
                self.open(&mut inner, now);
            }
            (BreakerState::Closed, _) => {
                inner.window.record(outcome, latency, now);
                let counts = inner.window.counts(now);
                if counts.total >= self.config.request_volume_threshold
                    && counts.error_percentage >= self.config.error_threshold_percentage
                {
                    tracing::debug!(
                        breaker = %self.name,
                        total = counts.total,
                        error_percentage = counts.error_percentage,
                        "Error threshold exceeded"
                    );
                    inner.reopens = 0;
                    self.open(&mut inner, now);
                }
            }
            // Late completions of calls admitted before the breaker tripped.
            _ => inner.window.record(outcome, latency, now),
        }
    }

    fn release_without_outcome(&self, permit: &mut Permit<'_>) {
        permit.settled = true;
        if permit.trial {
            let mut inner = self.lock();
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Execute `call` under breaker protection and the configured deadline.
    ///
    /// Errors: `CircuitOpenRejected` without running `call`, `RemoteTimeout`,
    /// `RemoteError`, or `IgnoredBusinessError` for ignored kinds.
    pub async fn execute<F, T>(&self, call: F) -> RpcResult<T>
    where
        F: Future<Output = Result<T, CallError>>,
    {
        let mut permit = self.acquire()?;
        let start = Instant::now();
        let result = with_deadline(self.config.timeout(), call).await;
        let latency = start.elapsed();

        match result {
            Ok(Ok(value)) => {
                self.settle(&mut permit, CallOutcome::Success, latency);
                Ok(value)
            }
            Ok(Err(err)) if self.ignored.contains(&err.kind) => {
                self.release_without_outcome(&mut permit);
                tracing::debug!(breaker = %self.name, kind = %err.kind, "Ignored error kind, not counted");
                Err(RpcError::IgnoredBusinessError {
                    kind: err.kind,
                    message: err.message,
                })
            }
            Ok(Err(err)) => {
                self.settle(&mut permit, CallOutcome::Failure, latency);
                tracing::debug!(breaker = %self.name, error = %err, "Remote call failed");
                Err(RpcError::RemoteError {
                    kind: err.kind,
                    message: err.message,
                })
            }
            Err(timeout) => {
                self.settle(&mut permit, CallOutcome::Timeout, latency);
                tracing::debug!(breaker = %self.name, timeout_ms = self.config.timeout_ms, "Remote call timed out");
                Err(timeout)
            }
        }
    }
}
