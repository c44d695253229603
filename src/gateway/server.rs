//! Gateway HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router and wire up middleware (request ID, tracing, timeout, limits)
//! - Run the filter chain before any routing decision
//! - Match the route table and forward through the resilient client
//! - Answer with the configured degraded response when the call falls back

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::client::{HttpCall, HttpReply, HttpTransport, InvokeOptions, RequestScope, ResilientClient};
use crate::config::GatewayConfig;
use crate::discovery::StaticResolver;
use crate::error::RpcError;
use crate::gateway::access_token::AccessTokenFilter;
use crate::gateway::filter::{ChainOutcome, FilterChain, FilterContext};
use crate::gateway::routes::RouteTable;
use crate::lifecycle::signalled;
use crate::load_balancer::{HealthRegistry, LoadBalancer};
use crate::observability::metrics;
use crate::resilience::{BreakerRegistry, Fallback};

/// Breaker command used for routed calls.
pub const ROUTE_COMMAND: &str = "route";

/// Body of the 502 sent when a call fails without a fallback. Details stay in the logs.
const UPSTREAM_FAILED_BODY: &str = "Upstream call failed";

/// UUID v4 request ids.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<ResilientClient<HttpTransport>>,
    pub filters: Arc<FilterChain>,
    pub routes: Arc<RouteTable>,
    pub fallback: Fallback<HttpCall, HttpReply>,
    pub max_body_bytes: usize,
}

/// The gateway: filter chain in front of the route table.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    resolver: Arc<StaticResolver>,
}

impl GatewayServer {
    /// Build every subsystem from config.
    pub fn new(config: GatewayConfig) -> Self {
        let resolver = Arc::new(StaticResolver::from_config(&config.services));
        let lb_config = &config.load_balancer;
        let health = Arc::new(
            HealthRegistry::new(lb_config.healthy_threshold, lb_config.unhealthy_threshold)
                .with_cooldown(Duration::from_millis(lb_config.unhealthy_cooldown_ms)),
        );

        let mut balancer =
            LoadBalancer::new(resolver.clone(), lb_config.rule.build(lb_config.retry_attempts)).with_health(health);
        for service in &config.services {
            if let Some(rule) = service.rule {
                balancer = balancer.with_service_rule(service.name.clone(), rule.build(lb_config.retry_attempts));
            }
        }

        let breakers = Arc::new(
            BreakerRegistry::new(config.breaker.defaults.clone()).with_overrides(config.breaker.command_configs()),
        );

        let transport = Arc::new(HttpTransport::new(config.gateway.max_body_bytes));
        let client = Arc::new(ResilientClient::builder(Arc::new(balancer), breakers, transport).build());

        let filters = Arc::new(FilterChain::new());
        if config.gateway.require_access_token {
            filters.add(Arc::new(
                AccessTokenFilter::new(config.gateway.access_token_param.clone())
                    .with_exempt_paths(config.gateway.exempt_paths.clone()),
            ));
        }

        let state = AppState {
            client,
            filters,
            routes: Arc::new(RouteTable::from_config(&config.routes)),
            fallback: degraded_reply(config.gateway.fallback_status),
            max_body_bytes: config.gateway.max_body_bytes,
        };

        Self {
            config,
            state,
            resolver,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<ResilientClient<HttpTransport>> {
        &self.state.client
    }

    pub fn filters(&self) -> &Arc<FilterChain> {
        &self.state.filters
    }

    pub fn resolver(&self) -> &Arc<StaticResolver> {
        &self.resolver
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(route_handler))
            .route("/{*path}", any(route_handler))
            .layer(middleware::from_fn_with_state(self.state.clone(), filter_middleware))
            .with_state(self.state.clone())
            .layer(ConcurrencyLimitLayer::new(self.config.listener.max_connections))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            filters = ?self.state.filters.names(),
            routes = self.state.routes.len(),
            "Gateway starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signalled(shutdown))
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn degraded_reply(status: u16) -> Fallback<HttpCall, HttpReply> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    Fallback::new(move |_call: &HttpCall, _err: &RpcError| HttpReply {
        status,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    })
}

/// Runs the filter chain; a short-circuit answers directly.
async fn filter_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut ctx = FilterContext::new(
        request.method().clone(),
        request.uri().clone(),
        request.headers().clone(),
    );

    match state.filters.run(&mut ctx) {
        ChainOutcome::Route => next.run(request).await,
        ChainOutcome::Rejected { filter, status, body } => {
            metrics::record_filter_rejection(filter);
            metrics::record_gateway_request(ctx.method.as_str(), status.as_u16(), start);
            (status, body).into_response()
        }
    }
}

/// Looks up the route and forwards through the resilient client.
async fn route_handler(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let path = request.uri().path().to_string();

    let route = match state.routes.match_path(&path) {
        Some(r) => r,
        None => {
            tracing::warn!(request_id = %request_id, path = %path, "No route matched");
            metrics::record_gateway_request(method.as_str(), 404, start);
            return (StatusCode::NOT_FOUND, "No matching route found").into_response();
        }
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            metrics::record_gateway_request(method.as_str(), 413, start);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let path_and_query = match parts.uri.query() {
        Some(q) => format!("{}?{}", route.forward_path, q),
        None => route.forward_path.clone(),
    };
    let call = HttpCall {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    };

    tracing::debug!(request_id = %request_id, service = %route.service, path = %call.path_and_query, "Routing request");

    let scope: RequestScope<HttpReply> = RequestScope::new();
    let options = InvokeOptions::command(ROUTE_COMMAND).in_scope(&scope);
    let response = match state.client.invoke_with(options, route.service, &call, &state.fallback).await {
        Ok(result) => {
            if result.is_degraded() {
                tracing::warn!(request_id = %request_id, service = %route.service, "Serving degraded response");
            }
            into_response(result.value)
        }
        Err(RpcError::NoEndpointsAvailable(service)) => {
            tracing::warn!(request_id = %request_id, service = %service, "No endpoints available");
            (StatusCode::SERVICE_UNAVAILABLE, "No endpoints available").into_response()
        }
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "Upstream call failed");
            (StatusCode::BAD_GATEWAY, UPSTREAM_FAILED_BODY).into_response()
        }
    };

    metrics::record_gateway_request(method.as_str(), response.status().as_u16(), start);
    response
}

fn into_response(reply: HttpReply) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    let headers = response.headers_mut();
    for (name, value) in reply.headers.iter() {
        if name == header::CONNECTION || name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouteConfig, ServiceConfig};
    use tower::ServiceExt;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "user".into(),
            endpoints: Vec::new(),
            rule: None,
        });
        config.routes.push(RouteConfig {
            path_prefix: "/user".into(),
            service: "user".into(),
            strip_prefix: true,
        });
        config
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_401_with_empty_body() {
        let router = GatewayServer::new(config()).router();
        let response = router.oneshot(get("/user/hello")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let router = GatewayServer::new(config()).router();
        let response = router.oneshot(get("/order/1?accessToken=t")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_service_without_endpoints_is_503() {
        let router = GatewayServer::new(config()).router();
        let response = router.oneshot(get("/user/hello?accessToken=t")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_filter_disabled_passes_through() {
        let mut cfg = config();
        cfg.gateway.require_access_token = false;
        let server = GatewayServer::new(cfg);
        assert!(server.filters().is_empty());

        let response = server.router().oneshot(get("/user/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
