//! Service discovery boundary.
//!
//! # Data Flow
//! ```text
//! config services table / registry client
//!     → EndpointResolver::resolve(service)
//!     → Vec<Endpoint> (may be stale; freshness is the resolver's contract)
//!     → load_balancer
//! ```
//!
//! # Design Decisions
//! - Resolution is synchronous and lock-free for readers
//! - The static resolver swaps its whole table atomically on reload

pub mod fixed;

use std::fmt::Debug;

use crate::load_balancer::Endpoint;

pub use fixed::StaticResolver;

/// Resolves a logical service name to its current endpoints.
/// Must be callable concurrently.
pub trait EndpointResolver: Send + Sync + Debug {
    fn resolve(&self, service: &str) -> Vec<Endpoint>;
}
