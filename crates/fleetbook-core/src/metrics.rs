// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metric sinks for convergence gauges and counters.
//!
//! The sink is built once at startup and handed to the convergence engines,
//! so tests can swap in [`RecordingMetricsSink`] and assert on what a pass
//! reported.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

/// Destination for convergence metrics.
pub trait MetricsSink: Send + Sync {
    /// Set a gauge to `value`.
    fn gauge(&self, name: &str, value: i64);

    /// Add `delta` to a counter.
    fn counter(&self, name: &str, delta: u64);
}

/// Emits every metric as a tracing event on the `fleetbook_core::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn gauge(&self, name: &str, value: i64) {
        info!(target: "fleetbook_core::metrics", metric = %name, value, "gauge");
    }

    fn counter(&self, name: &str, delta: u64) {
        info!(target: "fleetbook_core::metrics", metric = %name, delta, "counter");
    }
}

/// Keeps the last gauge values and running counter totals in memory.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    gauges: Mutex<HashMap<String, i64>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl RecordingMetricsSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value set for `name`.
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.gauges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// Total added to `name`, zero if never touched.
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn gauge(&self, name: &str, value: i64) {
        self.gauges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }

    fn counter(&self, name: &str, delta: u64) {
        *self
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert(0) += delta;
    }
}
