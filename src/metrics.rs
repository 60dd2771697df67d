// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the index sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `event_index_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: retried operation name (bulk_index_chunk, index_document, ...)
//! - `kind`: bootstrap, force
//! - `status` / `outcome`: success, error, rejected, cancelled, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// RETRY
// ═══════════════════════════════════════════════════════════════════════════

/// Record one attempt of a retried operation
pub fn record_retry_attempt(operation: &str, outcome: &str) {
    counter!(
        "event_index_sync_retry_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an operation that used up all of its attempts
pub fn record_retry_exhausted(operation: &str) {
    counter!(
        "event_index_sync_retry_exhausted_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BULK INDEXING
// ═══════════════════════════════════════════════════════════════════════════

/// Record a processed chunk (success, partial, invalid, error)
pub fn record_chunk(status: &str) {
    counter!(
        "event_index_sync_chunks_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record chunk size
pub fn record_chunk_size(count: usize) {
    histogram!("event_index_sync_chunk_size").record(count as f64);
}

pub fn record_documents_indexed(count: usize) {
    counter!("event_index_sync_documents_indexed_total").increment(count as u64);
}

pub fn record_documents_rejected(count: usize) {
    counter!("event_index_sync_documents_rejected_total").increment(count as u64);
}

/// Record index lifecycle operation (create, drop, recreate)
pub fn record_index_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "event_index_sync_index_operations_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC RUNS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a bootstrap / force sync run outcome (success, partial, skipped, failed, cancelled)
pub fn record_sync_run(kind: &str, outcome: &str) {
    counter!(
        "event_index_sync_runs_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_sync_duration(kind: &str, duration: Duration) {
    histogram!(
        "event_index_sync_run_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set last observed entity counts of both stores
pub fn set_store_counts(records: u64, documents: u64) {
    gauge!("event_index_sync_record_store_entities").set(records as f64);
    gauge!("event_index_sync_index_documents").set(documents as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSISTENCY
// ═══════════════════════════════════════════════════════════════════════════

/// Record a consistency check (scope: full, single; source: cache, computed)
pub fn record_consistency_check(scope: &str, source: &str) {
    counter!(
        "event_index_sync_consistency_checks_total",
        "scope" => scope.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_consistency_duration(duration: Duration) {
    histogram!("event_index_sync_consistency_check_seconds").record(duration.as_secs_f64());
}

/// Set drift counts from the last full check
pub fn set_drift(missing_in_index: usize, missing_in_record_store: usize, mismatches: usize) {
    gauge!("event_index_sync_drift", "kind" => "missing_in_index").set(missing_in_index as f64);
    gauge!("event_index_sync_drift", "kind" => "missing_in_record_store")
        .set(missing_in_record_store as f64);
    gauge!("event_index_sync_drift", "kind" => "field_mismatch").set(mismatches as f64);
}

/// Record one repair action (index, delete, reindex, skip)
pub fn record_repair_action(action: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "event_index_sync_repair_actions_total",
        "action" => action.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Set engine state (for monitoring state machine transitions)
pub fn set_engine_state(state: &str) {
    counter!(
        "event_index_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Set health verdict (1 = healthy, 0 = unhealthy)
pub fn set_healthy(healthy: bool) {
    gauge!("event_index_sync_healthy").set(if healthy { 1.0 } else { 0.0 });
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "event_index_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
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

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($component:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($component, $op)
    };
}
