use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::{Endpoint, HealthState};
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub breakers: usize,
}

#[derive(Serialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub state: HealthState,
}

#[derive(Serialize)]
pub struct ServiceEndpoints {
    pub service: String,
    pub endpoints: Vec<Endpoint>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        breakers: state.client.breakers().len(),
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.client.breakers().snapshots())
}

/// Endpoint health as observed from call outcomes.
pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<EndpointStatus>> {
    let statuses = state
        .client
        .balancer()
        .health()
        .snapshot()
        .into_iter()
        .map(|(endpoint, health)| EndpointStatus { endpoint, state: health })
        .collect();
    Json(statuses)
}

/// The resolver's current table.
pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceEndpoints>> {
    use crate::discovery::EndpointResolver;

    let services = state
        .resolver
        .services()
        .into_iter()
        .map(|service| ServiceEndpoints {
            endpoints: state.resolver.resolve(&service),
            service,
        })
        .collect();
    Json(services)
}
