//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_calls_total` (counter): calls by service, command, outcome
//! - `rpc_call_duration_seconds` (histogram): end-to-end call latency
//! - `rpc_fallbacks_total` (counter): degraded results by service, command
//! - `rpc_breaker_transitions_total` (counter): state changes by breaker, target state
//! - `rpc_cache_hits_total` (counter): request cache hits
//! - `rpc_batches_total` (counter) / `rpc_batch_size` (histogram): collapser flushes
//! - `gateway_requests_total` (counter): inbound requests by method, status
//! - `gateway_request_duration_seconds` (histogram)
//! - `gateway_filter_rejections_total` (counter): short-circuits by filter
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_call(service: &str, command: &str, outcome: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    counter!(
        "rpc_calls_total",
        "service" => service.to_string(),
        "command" => command.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "rpc_call_duration_seconds",
        "service" => service.to_string(),
        "command" => command.to_string()
    )
    .record(duration);
}

pub fn record_fallback(service: &str, command: &str) {
    counter!(
        "rpc_fallbacks_total",
        "service" => service.to_string(),
        "command" => command.to_string()
    )
    .increment(1);
}

pub fn record_breaker_transition(breaker: &str, state: &'static str) {
    counter!(
        "rpc_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_cache_hit() {
    counter!("rpc_cache_hits_total").increment(1);
}

pub fn record_batch(service: &str, size: usize) {
    counter!("rpc_batches_total", "service" => service.to_string()).increment(1);
    histogram!("rpc_batch_size", "service" => service.to_string()).record(size as f64);
}

pub fn record_gateway_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_filter_rejection(filter: &'static str) {
    counter!("gateway_filter_rejections_total", "filter" => filter).increment(1);
}
