//! Prometheus metrics for the jackpot server.
//!
//! Metrics are exposed in Prometheus text format on a separate listener
//! (`METRICS_BIND`) for scraping by monitoring systems.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use jp_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/jackpots/{id}/tickets", 201);
//! metrics::ticket_purchases_total(true);
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
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// `path` should be the matched route template, not the raw URI, to keep
/// label cardinality bounded.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Jackpot Metrics
// ============================================================================

/// Count a ticket purchase attempt.
pub fn ticket_purchases_total(success: bool) {
    metrics::counter!("ticket_purchases_total",
        "success" => success.to_string()
    )
    .increment(1);
}

/// Count a draw request by outcome (`completed`, `already_drawn`, `failed`).
pub fn draws_total(outcome: &'static str) {
    metrics::counter!("draws_total", "outcome" => outcome).increment(1);
}

/// Count winners credited by a draw run.
pub fn winners_credited_total(count: usize) {
    metrics::counter!("winners_credited_total").increment(count as u64);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Count a manual ledger posting.
pub fn ledger_postings_total(transaction_type: &str) {
    metrics::counter!("ledger_postings_total",
        "type" => transaction_type.to_string()
    )
    .increment(1);
}

/// Count a reconciliation check.
pub fn reconciliations_total(consistent: bool) {
    metrics::counter!("reconciliations_total",
        "consistent" => consistent.to_string()
    )
    .increment(1);
}

// ============================================================================
// Payment Metrics
// ============================================================================

/// Count a gateway callback by result (`pending`, `settled`, `already_settled`,
/// `rejected`).
pub fn payment_events_total(result: &'static str) {
    metrics::counter!("payment_events_total", "result" => result).increment(1);
}
