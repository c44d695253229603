//! Resilient RPC core and filtering gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                        GATEWAY                            │
//!   Inbound request    │  ┌───────────┐   ┌───────────┐   ┌────────────┐          │
//!   ───────────────────┼─▶│ request id│──▶│  filter   │──▶│   route    │──┐       │
//!                      │  │  + trace  │   │  chain    │   │   table    │  │       │
//!                      │  └───────────┘   └─────┬─────┘   └────────────┘  │       │
//!   401 / short-circuit│                        │                         │       │
//!   ◀──────────────────┼────────────────────────┘                         │       │
//!                      └──────────────────────────────────────────────────┼───────┘
//!                                                                         ▼
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                   RESILIENT CLIENT                        │
//!                      │  ┌─────────┐  ┌───────────┐  ┌─────────┐  ┌───────────┐  │
//!   Application  ──────┼─▶│ request │─▶│ collapser │─▶│  load   │─▶│  circuit  │──┼──▶ Endpoint
//!   invoke()           │  │  cache  │  │ (batches) │  │balancer │  │  breaker  │  │
//!                      │  └─────────┘  └───────────┘  └─────────┘  └─────┬─────┘  │
//!   value / fallback   │                                                 │        │
//!   ◀──────────────────┼─────────────────────────────────────────────────┘        │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod cache;
pub mod client;
pub mod collapser;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use client::{CallResult, ResilientClient, Transport};
pub use config::GatewayConfig;
pub use error::{CallError, RpcError, RpcResult};
pub use gateway::GatewayServer;
pub use lifecycle::Shutdown;
