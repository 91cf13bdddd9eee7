//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_reloads_total` (counter): reload attempts by outcome
//!   (`applied`, `rejected`, `failed`)
//! - `key_cache_requests_total` (counter): provisioner cache lookups by result
//! - `key_cache_entries` (gauge): DEKs currently cached
//! - `keys_provisioned_total` (counter): cache fills by source
//!   (`created`, `unwrapped`)
//! - `key_service_errors_total` (counter): failed external calls by operation
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus exporter is opt-in from the binary

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_config_reload(outcome: &'static str) {
    metrics::counter!("config_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("key_cache_requests_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("key_cache_entries").set(entries as f64);
}

pub fn record_key_provisioned(source: &'static str) {
    metrics::counter!("keys_provisioned_total", "source" => source).increment(1);
}

pub fn record_key_service_error(operation: &'static str) {
    metrics::counter!("key_service_errors_total", "operation" => operation).increment(1);
}
