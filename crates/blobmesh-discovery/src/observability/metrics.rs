//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `blobmesh_cycles_total` - counter of discovery cycles by outcome
//! - `blobmesh_cycle_duration_seconds` - histogram of cycle durations
//! - `blobmesh_peer_count` - gauge of peers returned by the last cycle
//! - `blobmesh_storage_retries_total` - counter of retried storage calls by operation
//! - `blobmesh_storage_errors_total` - counter of failed storage calls by operation and kind
//! - `blobmesh_records_skipped_total` - counter of unusable records by reason
//! - `blobmesh_records_reaped_total` - counter of expired records deleted

use crate::storage::StorageOp;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!("blobmesh_cycles_total", "Discovery cycles by outcome");
    describe_histogram!(
        "blobmesh_cycle_duration_seconds",
        "Duration of discovery cycles in seconds"
    );
    describe_gauge!("blobmesh_peer_count", "Peers returned by the last cycle");
    describe_counter!(
        "blobmesh_storage_retries_total",
        "Storage calls retried after a transient failure"
    );
    describe_counter!(
        "blobmesh_storage_errors_total",
        "Storage calls that failed after triage"
    );
    describe_counter!(
        "blobmesh_records_skipped_total",
        "Listed membership records that were not usable"
    );
    describe_counter!(
        "blobmesh_records_reaped_total",
        "Expired membership records deleted by housekeeping"
    );
}

pub fn record_cycle(outcome: &str, duration: Duration, peer_count: usize) {
    counter!("blobmesh_cycles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("blobmesh_cycle_duration_seconds").record(duration.as_secs_f64());
    gauge!("blobmesh_peer_count").set(peer_count as f64);
}

pub fn record_storage_retry(op: StorageOp) {
    counter!("blobmesh_storage_retries_total", "op" => op.as_str()).increment(1);
}

pub fn record_storage_error(op: StorageOp, kind: &'static str) {
    counter!("blobmesh_storage_errors_total", "op" => op.as_str(), "kind" => kind).increment(1);
}

pub fn record_skipped(reason: &'static str) {
    counter!("blobmesh_records_skipped_total", "reason" => reason).increment(1);
}

pub fn record_reaped() {
    counter!("blobmesh_records_reaped_total").increment(1);
}
