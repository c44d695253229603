//! Gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → request id (x-request-id, UUID v4), tracing span
//!     → filter.rs chain in ascending order (access_token.rs first)
//!         ShortCircuit → status + body returned, nothing forwarded
//!     → routes.rs (path prefix → service, prefix stripped)
//!     → resilient client (fresh cache scope per inbound request)
//!     → upstream response, or the degraded response on fallback
//! ```
//!
//! # Design Decisions
//! - Filters are synchronous; one request is one pass through the chain
//! - The chain is shared by all requests, each with its own context
//! - Filter order ties keep registration order

pub mod access_token;
pub mod filter;
pub mod routes;
pub mod server;

pub use access_token::AccessTokenFilter;
pub use filter::{ChainOutcome, FilterAction, FilterChain, FilterContext, GatewayFilter};
pub use routes::{RouteMatch, RouteTable};
pub use server::{AppState, GatewayServer, ROUTE_COMMAND};
