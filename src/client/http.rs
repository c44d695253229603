//! HTTP transport over a pooled hyper client.

use axum::{
    body::{Body, Bytes},
    http::{
        header::{self, HeaderMap},
        Method, Request, StatusCode, Uri,
    },
};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::hash::{Hash, Hasher};

use crate::client::transport::Transport;
use crate::error::CallError;
use crate::load_balancer::Endpoint;

/// Outbound HTTP request, independent of the endpoint it is sent to.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: Method,
    /// Path plus optional query, e.g. `/user/hello?id=12`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpCall {
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

// Headers are not part of the identity of a call.
impl Hash for HttpCall {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.path_and_query.hash(state);
        self.body.hash(state);
    }
}

/// Buffered upstream response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends [`HttpCall`]s with plain HTTP/1.1.
///
/// 5xx responses are failures (kind `server_error`), connection problems are
/// `transport` failures, everything else is a reply.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
    max_body_bytes: usize,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(max_body_bytes: usize) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, max_body_bytes }
    }

    fn build_request(endpoint: &Endpoint, call: &HttpCall) -> Result<Request<Body>, CallError> {
        let uri = Uri::builder()
            .scheme("http")
            .authority(endpoint.authority().as_str())
            .path_and_query(call.path_and_query.as_str())
            .build()
            .map_err(|e| CallError::new("invalid_request", e.to_string()))?;

        let mut builder = Request::builder().method(call.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in call.headers.iter() {
                if name == header::HOST || name == header::CONNECTION || name == header::CONTENT_LENGTH {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }
        builder
            .body(Body::from(call.body.clone()))
            .map_err(|e| CallError::new("invalid_request", e.to_string()))
    }
}

impl Transport for HttpTransport {
    type Request = HttpCall;
    type Response = HttpReply;

    fn call<'a>(&'a self, endpoint: &'a Endpoint, request: &'a HttpCall) -> BoxFuture<'a, Result<HttpReply, CallError>> {
        Box::pin(async move {
            let req = Self::build_request(endpoint, request)?;
            tracing::trace!(endpoint = %endpoint, method = %request.method, path = %request.path_and_query, "Sending upstream request");

            let response: hyper::Response<hyper::body::Incoming> = self
                .client
                .request(req)
                .await
                .map_err(|e| CallError::transport(e.to_string()))?;

            let (parts, body) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(body), self.max_body_bytes)
                .await
                .map_err(|e| CallError::transport(format!("reading body: {}", e)))?;

            if parts.status.is_server_error() {
                return Err(CallError::new(
                    "server_error",
                    format!("{} returned {}", endpoint, parts.status),
                ));
            }

            Ok(HttpReply {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        })
    }
}
