//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_denials_total` - Requests denied by a filter stage (labels: stage, status)
//! - `gateway_rate_limit_excluded_total` - Requests exempted from rate limiting (labels: reason)
//! - `gateway_rate_limit_backend_errors_total` - Counter backend failures, all failed open (labels: backend)
//! - `gateway_auth_validations_total` - Token validation outcomes (labels: outcome)
//! - `gateway_upstream_errors_total` - Failed forwards to the upstream service
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - End-to-end request duration (labels: method, status)
//! - `gateway_auth_validation_duration_seconds` - Validation service latency
//!
//! ## Gauges
//! - `gateway_auth_validations_in_flight` - Validations currently holding a worker permit
//!
//! # Usage
//!
//! ```rust,ignore
//! use admission_gateway::metrics::{init_metrics, record_denial};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_denial("rate_limit", 429);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const DENIALS_TOTAL: &str = "gateway_denials_total";
    pub const RATE_LIMIT_EXCLUDED_TOTAL: &str = "gateway_rate_limit_excluded_total";
    pub const RATE_LIMIT_BACKEND_ERRORS_TOTAL: &str = "gateway_rate_limit_backend_errors_total";
    pub const AUTH_VALIDATIONS_TOTAL: &str = "gateway_auth_validations_total";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "gateway_upstream_errors_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const AUTH_VALIDATION_DURATION_SECONDS: &str = "gateway_auth_validation_duration_seconds";
    pub const AUTH_VALIDATIONS_IN_FLIGHT: &str = "gateway_auth_validations_in_flight";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder and starts the HTTP listener on
/// `metrics_addr`. Fails if a recorder is already installed or the address
/// cannot be bound.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::DENIALS_TOTAL,
        "Total number of requests denied by a filter stage"
    );
    describe_counter!(
        names::RATE_LIMIT_EXCLUDED_TOTAL,
        "Total number of requests exempted from rate limiting"
    );
    describe_counter!(
        names::RATE_LIMIT_BACKEND_ERRORS_TOTAL,
        "Total number of rate limit backend failures (requests were allowed)"
    );
    describe_counter!(
        names::AUTH_VALIDATIONS_TOTAL,
        "Total number of token validations by outcome"
    );
    describe_counter!(
        names::UPSTREAM_ERRORS_TOTAL,
        "Total number of failed upstream forwards"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Gateway request duration in seconds"
    );
    describe_histogram!(
        names::AUTH_VALIDATION_DURATION_SECONDS,
        "Token validation service latency in seconds"
    );

    describe_gauge!(
        names::AUTH_VALIDATIONS_IN_FLIGHT,
        "Token validations currently in flight"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a request denied by `stage`.
pub fn record_denial(stage: &'static str, status: u16) {
    counter!(names::DENIALS_TOTAL, "stage" => stage, "status" => status.to_string()).increment(1);
}

/// Record a request exempted from rate limiting.
pub fn record_rate_limit_excluded(reason: &'static str) {
    counter!(names::RATE_LIMIT_EXCLUDED_TOTAL, "reason" => reason).increment(1);
}

/// Record a counter backend failure.
pub fn record_rate_limit_backend_error(backend: &'static str) {
    counter!(names::RATE_LIMIT_BACKEND_ERRORS_TOTAL, "backend" => backend).increment(1);
}

/// Record a token validation outcome (`valid`, `invalid` or `error`).
pub fn record_auth_validation(outcome: &'static str, duration_secs: f64) {
    counter!(names::AUTH_VALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::AUTH_VALIDATION_DURATION_SECONDS).record(duration_secs);
}

pub fn record_upstream_error() {
    counter!(names::UPSTREAM_ERRORS_TOTAL).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record end-to-end request duration.
pub fn record_request_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Adjust the in-flight validation gauge by `delta` (+1 on acquire, -1 on release).
pub fn add_auth_validations_in_flight(delta: f64) {
    gauge!(names::AUTH_VALIDATIONS_IN_FLIGHT).increment(delta);
}
