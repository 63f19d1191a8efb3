//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, route store and media outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by kind, status
//! - `proxy_request_duration_seconds` (histogram): latency by kind
//! - `route_config_loads_total` (counter): route loads by serving tier
//! - `route_config_refresh_total` (counter): background refreshes by outcome
//! - `route_config_publish_total` (counter): publishes/rollbacks by outcome
//! - `media_attempts_total` (counter): upstream media attempts by outcome
//! - `media_responses_total` (counter): media responses by delivery mode
//! - `media_stream_teardown_total` (counter): supervised stream teardowns by reason
//!
//! # Design Decisions
//! - Low-overhead metric updates; without an installed recorder every call is a no-op
//! - Label values are small fixed sets, never URLs or hosts

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_route_load(source: &'static str) {
    counter!("route_config_loads_total", "source" => source).increment(1);
}

pub fn record_route_refresh(outcome: &'static str) {
    counter!("route_config_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_route_publish(outcome: &'static str) {
    counter!("route_config_publish_total", "outcome" => outcome).increment(1);
}

pub fn record_media_attempt(outcome: &'static str) {
    counter!("media_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_media_response(mode: &'static str) {
    counter!("media_responses_total", "mode" => mode).increment(1);
}

pub fn record_stream_teardown(reason: &'static str) {
    counter!("media_stream_teardown_total", "reason" => reason).increment(1);
}
