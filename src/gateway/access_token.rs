//! Access token filter.
//!
//! Rejects any request whose token query parameter is missing or blank with
//! `401` and an empty body. The token is not verified here.

use axum::{body::Bytes, http::StatusCode};

use crate::gateway::filter::{FilterAction, FilterContext, GatewayFilter};

#[derive(Debug, Clone)]
pub struct AccessTokenFilter {
    param: String,
    exempt_paths: Vec<String>,
}

impl AccessTokenFilter {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            exempt_paths: Vec::new(),
        }
    }

    /// Path prefixes that skip the check. A prefix covers itself and the
    /// paths below it, never a longer segment: `/public` exempts
    /// `/public/info` but not `/publicity`.
    pub fn with_exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.exempt_paths = paths;
        self
    }
}

impl GatewayFilter for AccessTokenFilter {
    fn name(&self) -> &'static str {
        "access_token"
    }

    fn order(&self) -> i32 {
        0
    }

    fn should_apply(&self, ctx: &FilterContext) -> bool {
        !self.exempt_paths.iter().any(|p| is_under(ctx.path(), p))
    }

    fn run(&self, ctx: &mut FilterContext) -> FilterAction {
        tracing::info!(request_id = %ctx.request_id, "send {} request to {}", ctx.method, ctx.uri);

        match ctx.query_param(&self.param) {
            Some(token) if !token.trim().is_empty() => {
                tracing::info!(request_id = %ctx.request_id, "access token ok");
                FilterAction::Continue
            }
            _ => {
                tracing::warn!(request_id = %ctx.request_id, param = %self.param, "access token is empty");
                FilterAction::ShortCircuit {
                    status: StatusCode::UNAUTHORIZED,
                    body: Bytes::new(),
                }
            }
        }
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix.trim_end_matches('/')) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
