//! Client-side call path.
//!
//! # Data Flow
//! ```text
//! invoke(service, request, fallback)
//!     → cache scope (if any): hit returns immediately, concurrent misses share one call
//!     → batchable request? → collapser → one merged call per window
//!     → load balancer select(service)
//!     → breaker for (service, command): admit, deadline, account
//!     → transport.call(endpoint, request)
//!     → outcome fed back into endpoint health
//!     → success: value (cached in scope)
//!       hard error: returned to caller
//!       anything else: fallback(request, error), marked degraded
//! ```
//!
//! # Design Decisions
//! - Composition is explicit: a call site builds one client and passes the
//!   fallback on every call
//! - Only successful results are cached; degraded results never are
//! - The transport is a trait so tests and non-HTTP protocols plug in

pub mod http;
pub mod resilient;
pub mod transport;

pub use http::{HttpCall, HttpReply, HttpTransport};
pub use resilient::{
    BatchBinding, CallResult, InvokeOptions, ReplySource, RequestScope, ResilientClient, ResilientClientBuilder,
    DEFAULT_COMMAND,
};
pub use transport::Transport;
