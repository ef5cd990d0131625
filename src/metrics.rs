//! Prometheus Metrics Module
//!
//! Provides client-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Gateway events received by event name
//! - Reconnect attempts by reason
//! - Heartbeats by outcome
//! - REST requests by method, route template, and status
//! - REST request latency histograms
//! - Rate-limit waits by scope

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Gateway event counter - tracks dispatched events by event name
pub static GATEWAY_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_events_total", "Total gateway events received")
            .namespace("chat_client"),
        &["event"],
    )
    .expect("Failed to create GATEWAY_EVENTS_TOTAL metric")
});

/// Reconnect counter - tracks reconnect attempts by trigger
pub static GATEWAY_RECONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_reconnects_total", "Total gateway reconnect attempts")
            .namespace("chat_client"),
        &["reason"], // "transport_error", "server_close", "server_request", "invalid_session", "missed_ack"
    )
    .expect("Failed to create GATEWAY_RECONNECTS_TOTAL metric")
});

/// Heartbeat counter - tracks keep-alive outcomes
pub static HEARTBEATS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("heartbeats_total", "Total heartbeats by outcome").namespace("chat_client"),
        &["outcome"], // "sent", "acked", "missed"
    )
    .expect("Failed to create HEARTBEATS_TOTAL metric")
});

/// REST request counter - tracks requests by method, route template, and status
pub static REST_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rest_requests_total", "Total REST requests").namespace("chat_client"),
        &["method", "route", "status"],
    )
    .expect("Failed to create REST_REQUESTS_TOTAL metric")
});

/// REST request latency histogram in seconds
pub static REST_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "rest_request_duration_seconds",
            "REST request latency in seconds",
        )
        .namespace("chat_client")
        .buckets(buckets),
        &["method", "route"],
    )
    .expect("Failed to create REST_REQUEST_DURATION_SECONDS metric")
});

/// Rate-limit wait counter - tracks requests delayed by the limiter
pub static RATE_LIMIT_WAITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "rate_limit_waits_total",
            "Total requests delayed by rate limiting",
        )
        .namespace("chat_client"),
        &["scope"], // "bucket", "global"
    )
    .expect("Failed to create RATE_LIMIT_WAITS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(GATEWAY_EVENTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_EVENTS_TOTAL");
    registry
        .register(Box::new(GATEWAY_RECONNECTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_RECONNECTS_TOTAL");
    registry
        .register(Box::new(HEARTBEATS_TOTAL.clone()))
        .expect("Failed to register HEARTBEATS_TOTAL");
    registry
        .register(Box::new(REST_REQUESTS_TOTAL.clone()))
        .expect("Failed to register REST_REQUESTS_TOTAL");
    registry
        .register(Box::new(REST_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register REST_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(RATE_LIMIT_WAITS_TOTAL.clone()))
        .expect("Failed to register RATE_LIMIT_WAITS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to record REST request metrics
pub fn record_rest_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    REST_REQUESTS_TOTAL
        .with_label_values(&[method, route, &status.to_string()])
        .inc();
    REST_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route])
        .observe(duration_secs);
}

/// Helper to record a reconnect attempt
pub fn record_reconnect(reason: &str) {
    GATEWAY_RECONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

/// Helper to record a dispatched gateway event
pub fn record_gateway_event(event: &str) {
    GATEWAY_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

/// Helper to record a heartbeat outcome
pub fn record_heartbeat(outcome: &str) {
    HEARTBEATS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper to record a rate-limit wait
pub fn record_rate_limit_wait(scope: &str) {
    RATE_LIMIT_WAITS_TOTAL.with_label_values(&[scope]).inc();
}
