//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - On expiry the call future is dropped, which is the best-effort
//!   cancellation of the underlying transport
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use crate::error::RpcError;

/// Run `call` with a deadline.
pub async fn with_deadline<F, T>(deadline: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| RpcError::RemoteTimeout(deadline))
}
