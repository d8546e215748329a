//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `candy_region_splits_total` - counter of completed splits
//! - `candy_region_merges_total` - counter of completed merges
//! - `candy_rebalance_failures_total` - counter of aborted rebalances by op and cause
//! - `candy_regions` - gauge of regions in the table
//! - `candy_active_nodes` - gauge of hosts with a liveness record
//! - `candy_heartbeats_total` - counter of heartbeats, split by known host
//! - `candy_remote_call_duration_seconds` - histogram of notifier and coordination calls
//! - `candy_ids_allocated_total` - counter of ids handed out
//! - `candy_is_leader` - 1 while this process is the elected master

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the global Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Rebalancing
    describe_counter!("candy_region_splits_total", "Total number of region splits");
    describe_counter!("candy_region_merges_total", "Total number of region merges");
    describe_counter!(
        "candy_rebalance_failures_total",
        "Total number of rebalances aborted before commit"
    );

    // Membership
    describe_gauge!("candy_regions", "Number of regions in the table");
    describe_gauge!("candy_active_nodes", "Number of hosts with a liveness record");
    describe_counter!("candy_heartbeats_total", "Total number of heartbeats received");

    // Remote calls
    describe_histogram!(
        "candy_remote_call_duration_seconds",
        "Duration of notifier and coordination calls in seconds"
    );

    describe_counter!("candy_ids_allocated_total", "Total number of ids handed out");

    describe_gauge!("candy_is_leader", "Whether this process is the elected master");
}

pub fn record_split() {
    counter!("candy_region_splits_total").increment(1);
}

pub fn record_merge() {
    counter!("candy_region_merges_total").increment(1);
}

pub fn record_rebalance_failure(op: &str, kind: &str) {
    counter!(
        "candy_rebalance_failures_total",
        "op" => op.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn set_region_count(count: usize) {
    gauge!("candy_regions").set(count as f64);
}

pub fn set_active_nodes(count: usize) {
    gauge!("candy_active_nodes").set(count as f64);
}

pub fn record_heartbeat(known: bool) {
    counter!("candy_heartbeats_total", "known" => known.to_string()).increment(1);
}

pub fn record_remote_call(target: &'static str, duration: Duration) {
    histogram!("candy_remote_call_duration_seconds", "target" => target)
        .record(duration.as_secs_f64());
}

pub fn record_id_allocated() {
    counter!("candy_ids_allocated_total").increment(1);
}

pub fn set_leader(is_leader: bool) {
    gauge!("candy_is_leader").set(if is_leader { 1.0 } else { 0.0 });
}
