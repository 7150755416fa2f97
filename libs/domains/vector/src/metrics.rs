//! Metrics emitted by the engine
//!
//! Only the `metrics` facade is used here; installing a recorder/exporter is
//! up to the host process.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::models::Target;

/// Register descriptions for every metric the engine emits.
pub fn describe_metrics() {
    describe_counter!(
        "vector_pool_acquire_total",
        "Connection acquisitions by outcome"
    );
    describe_histogram!(
        "vector_pool_acquire_wait_seconds",
        "Time spent waiting for a pooled connection"
    );
    describe_gauge!(
        "vector_pool_connections",
        "Pooled connections by state (idle/active)"
    );
    describe_counter!(
        "vector_pool_health_probe_total",
        "Liveness probes by status"
    );
    describe_counter!("vector_batch_chunks_total", "Batch chunks by status");
    describe_counter!("vector_batch_items_total", "Batch items by status");
    describe_counter!("vector_search_total", "Searches by kind and cache result");
    describe_histogram!(
        "vector_search_duration_seconds",
        "End-to-end search latency"
    );
    describe_counter!(
        "vector_cache_operations_total",
        "Cache operations by result"
    );
    describe_counter!("vector_cache_evictions_total", "Evicted cache entries");
}

pub(crate) fn pool_acquire(target: &Target, outcome: &'static str, waited: Duration) {
    counter!(
        "vector_pool_acquire_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        "vector_pool_acquire_wait_seconds",
        "target" => target.to_string()
    )
    .record(waited.as_secs_f64());
}

pub(crate) fn pool_connections(target: &Target, idle: usize, active: usize) {
    gauge!(
        "vector_pool_connections",
        "target" => target.to_string(),
        "state" => "idle"
    )
    .set(idle as f64);
    gauge!(
        "vector_pool_connections",
        "target" => target.to_string(),
        "state" => "active"
    )
    .set(active as f64);
}

pub(crate) fn health_probe(target: &Target, healthy: bool) {
    counter!(
        "vector_pool_health_probe_total",
        "target" => target.to_string(),
        "status" => if healthy { "ok" } else { "failed" }
    )
    .increment(1);
}

pub(crate) fn batch_chunk(operation: &'static str, succeeded: bool, items: usize) {
    let status = if succeeded { "success" } else { "failed" };
    counter!(
        "vector_batch_chunks_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    counter!(
        "vector_batch_items_total",
        "operation" => operation,
        "status" => status
    )
    .increment(items as u64);
}

pub(crate) fn search(kind: &'static str, cached: bool, duration: Duration) {
    counter!(
        "vector_search_total",
        "kind" => kind,
        "cache" => if cached { "hit" } else { "miss" }
    )
    .increment(1);
    histogram!("vector_search_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

pub(crate) fn cache_op(op: &'static str, result: &'static str) {
    counter!(
        "vector_cache_operations_total",
        "op" => op,
        "result" => result
    )
    .increment(1);
}

pub(crate) fn cache_evictions(reason: &'static str, count: usize) {
    counter!("vector_cache_evictions_total", "reason" => reason).increment(count as u64);
}
