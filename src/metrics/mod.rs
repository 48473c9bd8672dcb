//! Prometheus metrics module
//!
//! Library code records through the global `metrics` macros. They are
//! no-ops until the binary installs the Prometheus recorder with
//! [`PoolMetrics::install`].

use crate::events::EventKind;
use ::metrics::{
    counter, describe_counter, describe_gauge, gauge, Unit,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Handle to the installed Prometheus recorder
#[derive(Clone)]
pub struct PoolMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PoolMetrics {
    /// Install the process-wide recorder. Call once.
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        Self::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "shard_pool_events_total",
            Unit::Count,
            "Lifecycle events emitted, by kind"
        );
        describe_counter!(
            "shard_pool_opens_total",
            Unit::Count,
            "Successful shard opens"
        );
        describe_counter!(
            "shard_pool_open_failures_total",
            Unit::Count,
            "Failed shard opens"
        );
        describe_counter!(
            "shard_pool_rescales_total",
            Unit::Count,
            "Completed restarts and rescales"
        );
        describe_counter!(
            "shard_pool_errors_total",
            Unit::Count,
            "Shard pool errors, by error type"
        );

        describe_gauge!(
            "shard_pool_shard_count",
            Unit::Count,
            "Current shard count"
        );
        describe_gauge!(
            "shard_pool_shards_ready",
            Unit::Count,
            "Number of shards reporting ready"
        );
        describe_gauge!(
            "shard_pool_entities_total",
            Unit::Count,
            "Guilds across all shards"
        );
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record an emitted event
pub fn record_event(kind: EventKind) {
    counter!("shard_pool_events_total", "kind" => kind.as_str()).increment(1);
}

/// Record a shard opened successfully
pub fn record_shard_opened(shard_id: u32) {
    counter!("shard_pool_opens_total", "shard_id" => shard_id.to_string()).increment(1);
}

/// Record a failed open
pub fn record_open_failure(shard_id: u32) {
    counter!("shard_pool_open_failures_total", "shard_id" => shard_id.to_string()).increment(1);
}

/// Record an error by its `error_type_label`
pub fn record_error(error_type: &'static str) {
    counter!("shard_pool_errors_total", "error_type" => error_type).increment(1);
}

/// Record a completed restart and the new count
pub fn record_rescale(shard_count: u32) {
    counter!("shard_pool_rescales_total").increment(1);
    set_shard_count(shard_count);
}

/// Set the current shard count
pub fn set_shard_count(shard_count: u32) {
    gauge!("shard_pool_shard_count").set(f64::from(shard_count));
}

/// Publish the aggregate figures of a status snapshot
pub fn set_status(shards_ready: usize, entities: u64) {
    gauge!("shard_pool_shards_ready").set(shards_ready as f64);
    gauge!("shard_pool_entities_total").set(entities as f64);
}
