//! Prometheus metrics for the gating layer.
//!
//! Metrics are exposed on a dedicated listener (`METRICS_PORT`), separate
//! from the API port. Recording functions are safe to call before (or
//! without) [`init_metrics`]; the `metrics` facade discards samples until a
//! recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `greenlight_rate_limited_total` - Requests rejected by the per-client limiter
//! - `greenlight_auth_failures_total` - Credential failures (label: reason)
//! - `greenlight_access_denied_total` - Activation/permission denials (label: reason)
//! - `greenlight_panics_recovered_total` - Handler panics turned into 500s
//! - `greenlight_cors_preflights_total` - Preflights answered for trusted origins
//! - `greenlight_tokens_issued_total` - Tokens handed out (label: scope)
//!
//! ## Gauges
//! - `greenlight_rate_limiter_clients` - Buckets held by the limiter after each sweep

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMITED_TOTAL: &str = "greenlight_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "greenlight_auth_failures_total";
    pub const ACCESS_DENIED_TOTAL: &str = "greenlight_access_denied_total";
    pub const PANICS_RECOVERED_TOTAL: &str = "greenlight_panics_recovered_total";
    pub const CORS_PREFLIGHTS_TOTAL: &str = "greenlight_cors_preflights_total";
    pub const TOKENS_ISSUED_TOTAL: &str = "greenlight_tokens_issued_total";
    pub const RATE_LIMITER_CLIENTS: &str = "greenlight_rate_limiter_clients";
}

/// Install the Prometheus exporter and describe every metric.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected by the per-client rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Requests rejected because of an unusable credential"
    );
    describe_counter!(
        names::ACCESS_DENIED_TOTAL,
        "Authenticated requests denied by activation or permission checks"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Panics caught while serving a request"
    );
    describe_counter!(
        names::CORS_PREFLIGHTS_TOTAL,
        "CORS preflight requests answered for trusted origins"
    );
    describe_counter!(
        names::TOKENS_ISSUED_TOTAL,
        "Activation and authentication tokens issued"
    );
    describe_gauge!(
        names::RATE_LIMITER_CLIENTS,
        "Client buckets currently held by the rate limiter"
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
// Counters
// =============================================================================

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// `reason` is the rejecting error's kind, e.g. `malformed_credential`.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_access_denied(reason: &'static str) {
    counter!(names::ACCESS_DENIED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_panic_recovered() {
    counter!(names::PANICS_RECOVERED_TOTAL).increment(1);
}

pub fn record_cors_preflight() {
    counter!(names::CORS_PREFLIGHTS_TOTAL).increment(1);
}

/// `scope` is the token scope, `activation` or `authentication`.
pub fn record_token_issued(scope: &'static str) {
    counter!(names::TOKENS_ISSUED_TOTAL, "scope" => scope).increment(1);
}

// =============================================================================
// Gauges
// =============================================================================

pub fn set_rate_limiter_clients(count: usize) {
    gauge!(names::RATE_LIMITER_CLIENTS).set(count as f64);
}
