//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber stops (servers drain, background tasks exit)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup lives in main: config first, then core, then listeners
//! - One broadcast channel, no per-task plumbing

pub mod shutdown;
pub mod signals;

pub use shutdown::{signalled, Shutdown};
