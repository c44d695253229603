//! Error kinds surfaced by the resilient call path.
//!
//! # Propagation
//! ```text
//! CallError (raw, from the transport)
//!     → breaker classification
//!         ignored kind  → IgnoredBusinessError (surfaced, breaker untouched)
//!         anything else → RemoteError (counted, fallback)
//!     → deadline exceeded → RemoteTimeout (counted, fallback)
//!     → breaker open      → CircuitOpenRejected (fallback)
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while invoking a remote service.
///
/// `Clone` so a single failed batch or single-flight call can be handed to
/// every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The resolver returned no usable endpoint for the service.
    #[error("no endpoints available for service '{0}'")]
    NoEndpointsAvailable(String),

    /// The breaker for this command is open (or half-open with no free trial slot).
    #[error("circuit '{0}' is open, call rejected")]
    CircuitOpenRejected(String),

    /// The call exceeded its deadline.
    #[error("remote call timed out after {0:?}")]
    RemoteTimeout(Duration),

    /// Non-ignored failure reported by the transport.
    #[error("remote call failed ({kind}): {message}")]
    RemoteError { kind: String, message: String },

    /// Failure of a kind configured as ignored; never trips the breaker.
    #[error("business error ({kind}): {message}")]
    IgnoredBusinessError { kind: String, message: String },

    /// The collapser's batched call failed for every waiter in the batch.
    #[error("batch call failed: {0}")]
    BatchFailure(String),
}

impl RpcError {
    /// True for errors that are handed back to the caller instead of being
    /// recovered through a fallback.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            RpcError::NoEndpointsAvailable(_) | RpcError::IgnoredBusinessError { .. }
        )
    }

    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RpcError::NoEndpointsAvailable(_) => "no_endpoints",
            RpcError::CircuitOpenRejected(_) => "rejected",
            RpcError::RemoteTimeout(_) => "timeout",
            RpcError::RemoteError { .. } => "failure",
            RpcError::IgnoredBusinessError { .. } => "ignored",
            RpcError::BatchFailure(_) => "batch_failure",
        }
    }
}

/// Raw failure returned by a [`Transport`](crate::client::Transport).
///
/// The `kind` is matched against the breaker's `ignored_error_kinds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub kind: String,
    pub message: String,
}

impl CallError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Connection-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("transport", message)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallError {}

pub type RpcResult<T> = Result<T, RpcError>;
