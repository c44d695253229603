//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call for (service, command):
//!     → registry.rs (breaker for the key, created on first use)
//!     → circuit_breaker.rs (admit / reject, half-open trials)
//!     → timeouts.rs (enforce the per-command deadline)
//!     → window.rs (record outcome, evaluate error ratio)
//!     → On open/timeout/failure: fallback.rs (degraded response)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every remote call has a deadline
//! - Breaker state is process-wide and only changes through transitions
//! - Fallbacks are plain functions supplied by the caller, never implicit

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use fallback::{Fallback, FallbackBinding, FallbackBindingError};
pub use registry::{run_eviction, BreakerKey, BreakerRegistry};
