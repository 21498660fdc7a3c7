// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the datastore extensions.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `datastore_ext_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: counter, list_cache, search, store
//! - `operation`: increment, get, list, query, put, delete
//! - `status`: success, error, contended

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed operation
pub fn record_operation(component: &str, operation: &str, status: &str) {
    counter!(
        "datastore_ext_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "datastore_ext_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A shard transaction lost a race
pub fn record_shard_contention(counter_name: &str) {
    counter!(
        "datastore_ext_shard_contention_total",
        "counter" => counter_name.to_string()
    )
    .increment(1);
}

pub fn set_shard_count(counter_name: &str, shards: usize) {
    gauge!(
        "datastore_ext_counter_shards",
        "counter" => counter_name.to_string()
    )
    .set(shards as f64);
}

/// Record a volatile cache lookup (`cache` names the consumer: counter, list)
pub fn record_cache_lookup(cache: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "datastore_ext_cache_lookups_total",
        "cache" => cache.to_string(),
        "result" => result
    )
    .increment(1);
}

/// A cache value that failed to decode and was discarded
pub fn record_cache_corruption(cache: &str) {
    counter!(
        "datastore_ext_cache_corruption_total",
        "cache" => cache.to_string()
    )
    .increment(1);
}

/// A best-effort cache call that failed and was ignored
pub fn record_cache_error(operation: &str) {
    counter!(
        "datastore_ext_cache_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_list_rebuild(kind: &str, records: usize) {
    counter!("datastore_ext_list_rebuilds_total", "kind" => kind.to_string()).increment(1);
    histogram!("datastore_ext_list_records", "kind" => kind.to_string()).record(records as f64);
}

pub fn record_invalidation(kind: &str) {
    counter!("datastore_ext_invalidations_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_search_results(count: usize) {
    histogram!("datastore_ext_search_results").record(count as f64);
}

pub fn record_search_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("datastore_ext_search_cache_total", "result" => result).increment(1);
}

/// A search whose text reduced to no tokens
pub fn record_degenerate_search(kind: &str) {
    counter!("datastore_ext_degenerate_searches_total", "kind" => kind.to_string()).increment(1);
}

pub fn set_search_cache_stats(entries: usize, hit_rate: f64) {
    gauge!("datastore_ext_search_cache_entries").set(entries as f64);
    gauge!("datastore_ext_search_cache_hit_rate").set(hit_rate);
}

/// Tokens written to an entity's search index property
pub fn record_index_tokens(kind: &str, tokens: usize) {
    histogram!("datastore_ext_index_tokens", "kind" => kind.to_string()).record(tokens as f64);
}

pub fn record_request(path: &str, duration: Duration) {
    histogram!("datastore_ext_request_seconds", "path" => path.to_string())
        .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}
