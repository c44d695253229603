//! Admin API: read-only views of breakers, endpoint health and services,
//! behind a bearer key.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::client::{HttpTransport, ResilientClient};
use crate::discovery::StaticResolver;

#[derive(Clone)]
pub struct AdminState {
    pub client: Arc<ResilientClient<HttpTransport>>,
    pub resolver: Arc<StaticResolver>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/services", get(get_services))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
