//! Metrics and observability utilities
//!
//! Provides Prometheus-style metrics for the identity flow
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Campus metrics
pub const METRICS_PREFIX: &str = "campus";

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Credential metrics
    describe_counter!(
        format!("{}_auth_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Credential calls (sign-in, sign-up, sign-out) by outcome"
    );

    describe_counter!(
        format!("{}_auth_events_total", METRICS_PREFIX),
        Unit::Count,
        "Auth state change notifications received"
    );

    // Resolution metrics
    describe_counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Identity resolutions by winning strategy"
    );

    describe_counter!(
        format!("{}_stale_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Resolutions discarded because a newer one was issued"
    );

    describe_histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Identity resolution latency in seconds"
    );

    describe_counter!(
        format!("{}_demo_logins_total", METRICS_PREFIX),
        Unit::Count,
        "Demo identities synthesized by role"
    );

    // Guard metrics
    describe_counter!(
        format!("{}_guard_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Route guard decisions by outcome"
    );

    // Resilience metrics
    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retried backend operations"
    );

    describe_gauge!(
        format!("{}_active_clients", METRICS_PREFIX),
        Unit::Count,
        "Browser clients with a live resolver"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record credential call outcomes
pub fn record_auth_call(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!(
        format!("{}_auth_calls_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record an auth state change notification
pub fn record_auth_event(event: &str) {
    counter!(
        format!("{}_auth_events_total", METRICS_PREFIX),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Helper to record a completed identity resolution
pub fn record_resolution(duration_secs: f64, source: &str, applied: bool) {
    if applied {
        counter!(
            format!("{}_resolutions_total", METRICS_PREFIX),
            "source" => source.to_string()
        )
        .increment(1);
    } else {
        counter!(format!("{}_stale_resolutions_total", METRICS_PREFIX)).increment(1);
    }

    histogram!(format!("{}_resolution_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record demo logins
pub fn record_demo_login(role: &str) {
    counter!(
        format!("{}_demo_logins_total", METRICS_PREFIX),
        "role" => role.to_string()
    )
    .increment(1);
}

/// Helper to record guard decisions
pub fn record_guard_decision(decision: &str) {
    counter!(
        format!("{}_guard_decisions_total", METRICS_PREFIX),
        "decision" => decision.to_string()
    )
    .increment(1);
}

/// Helper to record a retried operation
pub fn record_retry(operation: &str) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Helper to publish the live client count
pub fn set_active_clients(count: usize) {
    gauge!(format!("{}_active_clients", METRICS_PREFIX)).set(count as f64);
}
