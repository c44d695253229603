//! The resilient client façade.

use futures_util::future::BoxFuture;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::RequestCache;
use crate::client::transport::Transport;
use crate::collapser::{BatchFetch, BatchResults, Collapser, CollapserConfig};
use crate::error::{CallError, RpcError, RpcResult};
use crate::load_balancer::{Endpoint, LoadBalancer};
use crate::observability::metrics;
use crate::resilience::{BreakerKey, BreakerRegistry, Fallback};

/// Command name used when a call site does not name one.
pub const DEFAULT_COMMAND: &str = "call";

/// Where a result came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplySource {
    Remote(Endpoint),
    Batch,
    Cache,
    /// Degraded: produced by the fallback for this error.
    Fallback(RpcError),
}

/// A value plus its provenance.
#[derive(Debug, Clone)]
pub struct CallResult<R> {
    pub value: R,
    pub source: ReplySource,
}

impl<R> CallResult<R> {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, ReplySource::Fallback(_))
    }
}

/// Per-request cache scope for a client's responses.
pub type RequestScope<R> = RequestCache<RpcResult<CallResult<R>>>;

type KeyFn<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;

/// How a service's single-key requests are merged into batch requests.
pub struct BatchBinding<Req, Resp> {
    key_of: Arc<dyn Fn(&Req) -> Option<String> + Send + Sync>,
    merge: Arc<dyn Fn(&[String]) -> Req + Send + Sync>,
    split: Arc<dyn Fn(Resp, &[String]) -> Result<HashMap<String, Resp>, CallError> + Send + Sync>,
}

impl<Req, Resp> Clone for BatchBinding<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            key_of: self.key_of.clone(),
            merge: self.merge.clone(),
            split: self.split.clone(),
        }
    }
}

impl<Req, Resp> BatchBinding<Req, Resp> {
    /// - `key_of`: the batch key of a request, `None` when it is not batchable
    /// - `merge`: one request covering all keys
    /// - `split`: the batch response broken back down per key
    pub fn new<K, M, S>(key_of: K, merge: M, split: S) -> Self
    where
        K: Fn(&Req) -> Option<String> + Send + Sync + 'static,
        M: Fn(&[String]) -> Req + Send + Sync + 'static,
        S: Fn(Resp, &[String]) -> Result<HashMap<String, Resp>, CallError> + Send + Sync + 'static,
    {
        Self {
            key_of: Arc::new(key_of),
            merge: Arc::new(merge),
            split: Arc::new(split),
        }
    }
}

struct Batching<T: Transport> {
    binding: BatchBinding<T::Request, T::Response>,
    collapser: Collapser<String, T::Response>,
}

/// Per-call options.
pub struct InvokeOptions<'a, R> {
    pub command: &'a str,
    pub scope: Option<&'a RequestScope<R>>,
}

impl<R> Default for InvokeOptions<'_, R> {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND,
            scope: None,
        }
    }
}

impl<'a, R> InvokeOptions<'a, R> {
    pub fn command(command: &'a str) -> Self {
        Self { command, scope: None }
    }

    pub fn in_scope(mut self, scope: &'a RequestScope<R>) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Load balancer, breaker, request cache and collapser behind one call.
///
/// Every failure ends either in an error the caller must see
/// (`NoEndpointsAvailable`, `IgnoredBusinessError`) or in a fallback result
/// marked as degraded.
pub struct ResilientClient<T: Transport> {
    balancer: Arc<LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    transport: Arc<T>,
    cache_key: Option<KeyFn<T::Request>>,
    batching: HashMap<String, Batching<T>>,
}

impl<T: Transport> std::fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("breakers", &self.breakers.len())
            .field("batched_services", &self.batching.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder<T: Transport> {
    balancer: Arc<LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    transport: Arc<T>,
    cache_key: Option<KeyFn<T::Request>>,
    batching: HashMap<String, Batching<T>>,
}

impl<T: Transport> ResilientClientBuilder<T> {
    /// Replace the default hash-based cache key.
    pub fn cache_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&T::Request) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(f));
        self
    }

    /// Route batchable requests to `service` through a collapser. The batch
    /// call itself is protected by the `(service, command)` breaker.
    pub fn batch(
        mut self,
        service: impl Into<String>,
        command: impl Into<String>,
        config: CollapserConfig,
        binding: BatchBinding<T::Request, T::Response>,
    ) -> Self {
        let service = service.into();
        let command = command.into();

        let fetch = batch_fetch(
            self.balancer.clone(),
            self.breakers.clone(),
            self.transport.clone(),
            binding.clone(),
            service.clone(),
            command,
        );

        let collapser = Collapser::new(service.clone(), config, fetch);
        self.batching.insert(service, Batching { binding, collapser });
        self
    }

    pub fn build(self) -> ResilientClient<T> {
        ResilientClient {
            balancer: self.balancer,
            breakers: self.breakers,
            transport: self.transport,
            cache_key: self.cache_key,
            batching: self.batching,
        }
    }
}

fn batch_fetch<T: Transport>(
    balancer: Arc<LoadBalancer>,
    breakers: Arc<BreakerRegistry>,
    transport: Arc<T>,
    binding: BatchBinding<T::Request, T::Response>,
    service: String,
    command: String,
) -> BatchFetch<String, T::Response> {
    Arc::new(move |keys: Vec<String>| -> BoxFuture<'static, RpcResult<BatchResults<String, T::Response>>> {
        let balancer = balancer.clone();
        let breakers = breakers.clone();
        let transport = transport.clone();
        let binding = binding.clone();
        let service = service.clone();
        let command = command.clone();
        Box::pin(async move {
            let merged = (binding.merge)(&keys);
            let (reply, _) = call_once(&balancer, &breakers, transport.as_ref(), &service, &command, &merged).await?;
            let values = (binding.split)(reply, &keys).map_err(|e| RpcError::BatchFailure(e.to_string()))?;
            Ok(values.into_iter().map(|(k, v)| (k, Ok(v))).collect())
        })
    })
}

/// Select, execute under the breaker, feed the outcome back into endpoint health.
async fn call_once<T: Transport>(
    balancer: &LoadBalancer,
    breakers: &BreakerRegistry,
    transport: &T,
    service: &str,
    command: &str,
    request: &T::Request,
) -> RpcResult<(T::Response, Endpoint)> {
    let endpoint = balancer.select(service)?;
    let breaker = breakers.get(&BreakerKey::new(service, command));
    let result = breaker.execute(transport.call(&endpoint, request)).await;

    match &result {
        Ok(_) => balancer.report(&endpoint, true),
        Err(RpcError::RemoteError { .. } | RpcError::RemoteTimeout(_)) => balancer.report(&endpoint, false),
        // Rejected calls never reached the endpoint.
        Err(_) => {}
    }
    result.map(|value| (value, endpoint))
}

impl<T: Transport> ResilientClient<T> {
    pub fn builder(
        balancer: Arc<LoadBalancer>,
        breakers: Arc<BreakerRegistry>,
        transport: Arc<T>,
    ) -> ResilientClientBuilder<T> {
        ResilientClientBuilder {
            balancer,
            breakers,
            transport,
            cache_key: None,
            batching: HashMap::new(),
        }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Cache key of `request` for `service:command`.
    pub fn cache_key(&self, service: &str, command: &str, request: &T::Request) -> String {
        match &self.cache_key {
            Some(f) => format!("{}:{}:{}", service, command, f(request)),
            None => {
                let mut hasher = DefaultHasher::new();
                request.hash(&mut hasher);
                format!("{}:{}:{:016x}", service, command, hasher.finish())
            }
        }
    }

    /// Invoke with the default command and no cache scope.
    pub async fn invoke(
        &self,
        service: &str,
        request: &T::Request,
        fallback: &Fallback<T::Request, T::Response>,
    ) -> RpcResult<CallResult<T::Response>> {
        self.invoke_with(InvokeOptions::default(), service, request, fallback).await
    }

    pub async fn invoke_with(
        &self,
        options: InvokeOptions<'_, T::Response>,
        service: &str,
        request: &T::Request,
        fallback: &Fallback<T::Request, T::Response>,
    ) -> RpcResult<CallResult<T::Response>> {
        let command = options.command;
        let start = Instant::now();

        let outcome = match options.scope {
            Some(scope) => {
                let key = self.cache_key(service, command, request);
                let mut computed = false;
                let result = scope
                    .get_or_compute_if(
                        &key,
                        || {
                            computed = true;
                            self.fetch(service, command, request)
                        },
                        |r| r.is_ok(),
                    )
                    .await;
                if computed {
                    result
                } else {
                    result.map(|hit| CallResult {
                        value: hit.value,
                        source: ReplySource::Cache,
                    })
                }
            }
            None => self.fetch(service, command, request).await,
        };

        match outcome {
            Ok(result) => {
                let label = match result.source {
                    ReplySource::Cache => "cache",
                    ReplySource::Batch => "batch",
                    _ => "success",
                };
                metrics::record_call(service, command, label, start);
                Ok(result)
            }
            Err(err) if err.is_hard() => {
                metrics::record_call(service, command, err.label(), start);
                tracing::debug!(service = %service, command = %command, error = %err, "Call failed, surfacing to caller");
                Err(err)
            }
            Err(err) => {
                metrics::record_call(service, command, err.label(), start);
                metrics::record_fallback(service, command);
                tracing::warn!(service = %service, command = %command, error = %err, "Call degraded to fallback");
                Ok(CallResult {
                    value: fallback.apply(request, &err),
                    source: ReplySource::Fallback(err),
                })
            }
        }
    }

    /// Evict `request`'s entry from `scope`. Returns true if one was stored.
    pub fn flush_cache(
        &self,
        scope: &RequestScope<T::Response>,
        service: &str,
        command: &str,
        request: &T::Request,
    ) -> bool {
        scope.invalidate(&self.cache_key(service, command, request))
    }

    async fn fetch(&self, service: &str, command: &str, request: &T::Request) -> RpcResult<CallResult<T::Response>> {
        if let Some(batching) = self.batching.get(service) {
            if let Some(key) = (batching.binding.key_of)(request) {
                let value = batching.collapser.collapse(key).await?;
                return Ok(CallResult {
                    value,
                    source: ReplySource::Batch,
                });
            }
        }

        let (value, endpoint) = call_once(
            &self.balancer,
            &self.breakers,
            self.transport.as_ref(),
            service,
            command,
            request,
        )
        .await?;
        Ok(CallResult {
            value,
            source: ReplySource::Remote(endpoint),
        })
    }
}
