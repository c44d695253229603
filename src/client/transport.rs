//! Remote call boundary.

use futures_util::future::BoxFuture;
use std::hash::Hash;

use crate::error::CallError;
use crate::load_balancer::Endpoint;

/// Performs one remote call against one endpoint.
///
/// The deadline is enforced by the breaker around this call; an
/// implementation only needs to stop work when its future is dropped.
pub trait Transport: Send + Sync + 'static {
    /// Request payload. Hashed for the default cache key.
    type Request: Hash + Send + Sync + 'static;

    /// Response payload. Cloned to every waiter of a shared call.
    type Response: Clone + Send + Sync + 'static;

    fn call<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, Result<Self::Response, CallError>>;
}
