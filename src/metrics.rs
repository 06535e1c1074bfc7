// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the directory synchronizer.
//!
//! Uses the `metrics` crate facade; the host process installs the exporter.
//!
//! # Metric Naming Convention
//! - `tenant_directory_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: insert, update, replace, delete, invalidate, unsupported
//! - `transition`: create, attribute_update, rename, soft_delete, restore, ignored
//! - `outcome`: applied, skipped, hit, miss, corrupt
//! - `reason`: skip or drop reason

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Change event pulled off the feed.
pub fn record_event_received(operation: &str) {
    counter!(
        "tenant_directory_events_received_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Transition projected (or deliberately skipped).
pub fn record_projection(transition: &str, outcome: &str, reason: &str) {
    counter!(
        "tenant_directory_projections_total",
        "transition" => transition.to_string(),
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Event dropped after a decode, cache or store failure.
pub fn record_event_dropped(reason: &str) {
    counter!(
        "tenant_directory_events_dropped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_projection_latency(transition: &str, duration: Duration) {
    histogram!(
        "tenant_directory_projection_seconds",
        "transition" => transition.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Lifecycle state entered. The gauge holds the numeric state
/// (0 = stopped, 1 = starting, 2 = running, 3 = stopping).
pub fn record_state(state: &str, code: u8) {
    counter!(
        "tenant_directory_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
    gauge!("tenant_directory_state").set(code as f64);
}

/// Processing loop ended because the feed went away.
pub fn record_feed_terminated(reason: &str) {
    counter!(
        "tenant_directory_feed_terminations_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Routing-layer lookup.
pub fn record_resolve(outcome: &str) {
    counter!(
        "tenant_directory_resolves_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records projection latency on drop.
pub struct ProjectionTimer {
    transition: &'static str,
    start: Instant,
}

impl ProjectionTimer {
    pub fn new(transition: &'static str) -> Self {
        Self {
            transition,
            start: Instant::now(),
        }
    }
}

impl Drop for ProjectionTimer {
    fn drop(&mut self) {
        record_projection_latency(self.transition, self.start.elapsed());
    }
}
