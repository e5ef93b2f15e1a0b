//! Prometheus metrics for the auth server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener
//! (`METRICS_BIND`). Without an installed exporter every call here is a no-op.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use ff_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::login_attempts_total("success");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment login attempts counter.
///
/// `outcome` is one of `success`, `two_factor_required` or `failure`.
pub fn login_attempts_total(outcome: &'static str) {
    metrics::counter!("login_attempts_total", "outcome" => outcome).increment(1);
}

/// Increment sessions created counter.
pub fn sessions_created_total() {
    metrics::counter!("sessions_created_total").increment(1);
}

/// Count a rejected token by its error code.
pub fn token_rejections_total(code: &'static str) {
    metrics::counter!("token_rejections_total", "code" => code).increment(1);
}

/// Increment CSRF rejection counter.
pub fn csrf_rejections_total() {
    metrics::counter!("csrf_rejections_total").increment(1);
}

// ============================================================================
// Upload Metrics
// ============================================================================

/// Count an upload by result, `accepted` or a rejection reason.
pub fn uploads_total(result: &'static str) {
    metrics::counter!("uploads_total", "result" => result).increment(1);
}

// ============================================================================
// Maintenance Metrics
// ============================================================================

/// Record one sweep run and the rows it removed.
pub fn sweep_completed(sessions_removed: u64) {
    metrics::counter!("session_sweeps_total").increment(1);
    metrics::counter!("sessions_swept_total").increment(sessions_removed);
}
