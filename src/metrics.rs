// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for inventory-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding service is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `inventory_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: sql, redis, memory
//! - `event`: created, recycled, discarded
//! - `status`: success, failure, skipped
//! - `outcome`: created, updated, unchanged, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTION POOL
// ═══════════════════════════════════════════════════════════════════════════

/// Set pool occupancy gauges
pub fn set_pool_connections(active: usize, idle: usize, checked_out: usize) {
    gauge!("inventory_sync_pool_active_connections").set(active as f64);
    gauge!("inventory_sync_pool_idle_connections").set(idle as f64);
    gauge!("inventory_sync_pool_checked_out").set(checked_out as f64);
}

/// Record a connection lifecycle event (created, recycled, discarded)
pub fn record_pool_connection(event: &str) {
    counter!(
        "inventory_sync_pool_connections_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record time spent waiting inside `acquire`
pub fn record_pool_wait(duration: Duration) {
    histogram!("inventory_sync_pool_acquire_seconds").record(duration.as_secs_f64());
}

/// Record an acquire that hit its deadline
pub fn record_pool_timeout() {
    counter!("inventory_sync_pool_timeouts_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC RUNS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a full sync attempt (success, failure, skipped)
pub fn record_sync_run(status: &str) {
    counter!(
        "inventory_sync_runs_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record full sync duration
pub fn record_sync_duration(duration: Duration) {
    histogram!("inventory_sync_run_seconds").record(duration.as_secs_f64());
}

/// Record per-item outcomes of a run (created, updated, unchanged, error)
pub fn record_items(outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "inventory_sync_items_total",
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

/// Record a single-item check and where its quantity came from (source, cached)
pub fn record_item_check(source: &str) {
    counter!(
        "inventory_sync_item_checks_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Set background loop state (0 = Stopped, 1 = Running)
pub fn set_engine_state(running: bool) {
    gauge!("inventory_sync_engine_running").set(if running { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(backend: &str, operation: &str, error_type: &str) {
    counter!(
        "inventory_sync_errors_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record backend operation latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "inventory_sync_operation_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed here; these only check the calls don't panic.
    // Recorded values are asserted in the demo via metrics-util.

    #[test]
    fn test_pool_metrics() {
        set_pool_connections(10, 9, 1);
        record_pool_connection("created");
        record_pool_connection("recycled");
        record_pool_wait(Duration::from_millis(120));
        record_pool_timeout();
    }

    #[test]
    fn test_run_metrics() {
        record_sync_run("success");
        record_sync_run("skipped");
        record_sync_duration(Duration::from_millis(350));
        record_items("updated", 3);
        record_items("error", 0);
        record_item_check("cached");
        set_engine_state(true);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("redis", "find_one");
            std::thread::sleep(Duration::from_micros(10));
        }
        record_error("sql", "fetch_all", "query");
    }
}
