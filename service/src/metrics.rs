//! Metrics for issuance and migration.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `coupons.issued{pool}` - Successful issuances
//! - `coupons.rejected{pool, reason}` - Rejected or failed issuances
//! - `coupons.scan.published{pool}` - Records published for migration
//! - `coupons.scan.skipped{pool, reason}` - Records the scanner left alone
//! - `coupons.scan.publish_failures{pool}` - Publishes the queue refused
//! - `coupons.migration.persisted` - Rows written to the durable store
//! - `coupons.migration.duplicates` - Migrations found already persisted
//! - `coupons.migration.failed{kind}` - Migrations that failed
//!
//! ## Histograms
//! - `coupons.issue.duration_seconds` - Issuance latency
//! - `coupons.ledger.transaction_seconds` - Durable transaction latency
//!
//! With the Prometheus exporter the dots become underscores.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_coupon_metrics();
    tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

/// Register all metric descriptions.
pub fn register_coupon_metrics() {
    describe_counter!("coupons.issued", "Coupons issued, by pool");
    describe_counter!(
        "coupons.rejected",
        "Issuance requests rejected, by pool and reason"
    );
    describe_histogram!("coupons.issue.duration_seconds", "Issuance latency");

    describe_counter!(
        "coupons.scan.published",
        "Live records published to the migration queue"
    );
    describe_counter!(
        "coupons.scan.skipped",
        "Live records skipped by the scanner (unparseable, outside_window)"
    );
    describe_counter!(
        "coupons.scan.publish_failures",
        "Publishes refused by the migration queue"
    );

    describe_counter!(
        "coupons.migration.persisted",
        "Coupons written to the durable store"
    );
    describe_counter!(
        "coupons.migration.duplicates",
        "Migrations of coupons that were already persisted"
    );
    describe_counter!("coupons.migration.failed", "Failed migrations, by kind");
    describe_histogram!(
        "coupons.ledger.transaction_seconds",
        "Durable store transaction latency"
    );

    tracing::debug!("Coupon metrics registered");
}

// ============================================================================
// Issuance
// ============================================================================

/// Record a successful issuance.
pub fn record_issued(pool: &str, duration_secs: f64) {
    metrics::counter!("coupons.issued", "pool" => pool.to_string()).increment(1);
    metrics::histogram!("coupons.issue.duration_seconds").record(duration_secs);
}

/// Record a rejected or failed issuance.
pub fn record_rejected(pool: &str, reason: &'static str) {
    metrics::counter!("coupons.rejected", "pool" => pool.to_string(), "reason" => reason)
        .increment(1);
}

// ============================================================================
// Scanner
// ============================================================================

/// Record records published in one scan of `pool`.
pub fn record_scan_published(pool: &str, count: u64) {
    metrics::counter!("coupons.scan.published", "pool" => pool.to_string()).increment(count);
}

/// Record one skipped record.
pub fn record_scan_skipped(pool: &str, reason: &'static str) {
    metrics::counter!("coupons.scan.skipped", "pool" => pool.to_string(), "reason" => reason)
        .increment(1);
}

/// Record one refused publish.
pub fn record_scan_publish_failure(pool: &str) {
    metrics::counter!("coupons.scan.publish_failures", "pool" => pool.to_string()).increment(1);
}

// ============================================================================
// Migration
// ============================================================================

/// Record a row written to the durable store.
pub fn record_migration_persisted() {
    metrics::counter!("coupons.migration.persisted").increment(1);
}

/// Record a migration that found its row already present.
pub fn record_migration_duplicate() {
    metrics::counter!("coupons.migration.duplicates").increment(1);
}

/// Record a failed migration.
pub fn record_migration_failed(kind: &'static str) {
    metrics::counter!("coupons.migration.failed", "kind" => kind).increment(1);
}
