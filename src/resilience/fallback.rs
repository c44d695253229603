//! Fallbacks: degraded substitutes for a failed or rejected call.
//!
//! A fallback is a function of `(request, error) -> response`. A factory
//! keyed by the error is just a function returning such a function, so both
//! styles collapse into [`Fallback`]. [`FallbackBinding`] is how a call site
//! declares one; configuring both styles at once is rejected.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::error::RpcError;

type Handler<Req, Resp> = Arc<dyn Fn(&Req, &RpcError) -> Resp + Send + Sync>;
type Factory<Req, Resp> = Arc<dyn Fn(&RpcError) -> Box<dyn Fn(&Req) -> Resp + Send> + Send + Sync>;

/// Degraded-response producer. Must not perform the risky remote call itself.
pub struct Fallback<Req, Resp> {
    handler: Handler<Req, Resp>,
}

impl<Req, Resp> Clone for Fallback<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for Fallback<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fallback")
    }
}

impl<Req: 'static, Resp: 'static> Fallback<Req, Resp> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Req, &RpcError) -> Resp + Send + Sync + 'static,
    {
        Self { handler: Arc::new(f) }
    }

    /// Always the same response.
    pub fn constant(response: Resp) -> Self
    where
        Resp: Clone + Send + Sync,
    {
        Self::new(move |_, _| response.clone())
    }

    /// Build the handler from the error first, then apply it to the request.
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn(&RpcError) -> Box<dyn Fn(&Req) -> Resp + Send> + Send + Sync + 'static,
    {
        Self::new(move |req, err| factory(err)(req))
    }

    pub fn apply(&self, request: &Req, error: &RpcError) -> Resp {
        (self.handler)(request, error)
    }
}

/// Error raised when a call site's fallback binding is not exactly one style.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackBindingError {
    #[error("command '{0}' binds both a fallback and a fallback factory")]
    Ambiguous(String),
    #[error("command '{0}' has no fallback bound")]
    Missing(String),
}

/// Declarative binding for one call site, validated once at startup.
pub struct FallbackBinding<Req, Resp> {
    command: String,
    handler: Option<Handler<Req, Resp>>,
    factory: Option<Factory<Req, Resp>>,
}

impl<Req: 'static, Resp: 'static> FallbackBinding<Req, Resp> {
    pub fn for_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            handler: None,
            factory: None,
        }
    }

    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Req, &RpcError) -> Resp + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    pub fn fallback_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RpcError) -> Box<dyn Fn(&Req) -> Resp + Send> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn bind(self) -> Result<Fallback<Req, Resp>, FallbackBindingError> {
        match (self.handler, self.factory) {
            (Some(handler), None) => Ok(Fallback { handler }),
            (None, Some(factory)) => Ok(Fallback::new(move |req, err| factory(err)(req))),
            (Some(_), Some(_)) => Err(FallbackBindingError::Ambiguous(self.command)),
            (None, None) => Err(FallbackBindingError::Missing(self.command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> RpcError {
        RpcError::CircuitOpenRejected("user:hello".into())
    }

    #[test]
    fn test_fallback_sees_request_and_error() {
        let fb = Fallback::new(|id: &String, err: &RpcError| format!("hello...error..{} ({})", id, err.label()));
        assert_eq!(fb.apply(&"12".to_string(), &open()), "hello...error..12 (rejected)");
    }

    #[test]
    fn test_constant() {
        let fb: Fallback<u32, &str> = Fallback::constant("degraded");
        assert_eq!(fb.apply(&1, &open()), "degraded");
    }

    #[test]
    fn test_factory_keyed_by_error() {
        let fb: Fallback<String, String> = Fallback::from_factory(|err: &RpcError| {
            let label = err.label();
            Box::new(move |id: &String| format!("{} fallback for {}", label, id))
        });
        assert_eq!(
            fb.apply(&"7".into(), &RpcError::RemoteTimeout(std::time::Duration::from_millis(5))),
            "timeout fallback for 7"
        );
    }

    #[test]
    fn test_binding_requires_exactly_one_style() {
        let ambiguous = FallbackBinding::<String, String>::for_command("user:hello")
            .fallback(|id, _| id.clone())
            .fallback_factory(|_| Box::new(|id: &String| id.clone()))
            .bind();
        assert_eq!(
            ambiguous.err(),
            Some(FallbackBindingError::Ambiguous("user:hello".into()))
        );

        let missing = FallbackBinding::<String, String>::for_command("user:hello").bind();
        assert_eq!(missing.err(), Some(FallbackBindingError::Missing("user:hello".into())));

        let ok = FallbackBinding::<String, String>::for_command("user:hello")
            .fallback_factory(|_| Box::new(|id: &String| format!("fall back error....{}", id)))
            .bind()
            .unwrap();
        assert_eq!(ok.apply(&"3".into(), &open()), "fall back error....3");
    }
}
