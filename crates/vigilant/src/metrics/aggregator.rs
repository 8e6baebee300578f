// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory aggregation of metric events into per-series values.
//!
//! The aggregator is purely synchronous. The collector owns it behind a lock and
//! takes one snapshot per flush window, which resets every series.

use chrono::{DateTime, Utc};
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use tracing::trace;

use crate::messages::{CounterMessage, GaugeMessage, HistogramMessage, MetricsSnapshot};
use crate::metrics::event::{GaugeMode, MetricEvent, MetricIdentity, MetricKind};

type SeriesMap<V> = HashMap<MetricIdentity, V, FnvBuildHasher>;

#[derive(Debug, Default)]
pub struct Aggregator {
    counters: SeriesMap<f64>,
    gauges: SeriesMap<f64>,
    histograms: SeriesMap<Vec<f64>>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into its series.
    pub fn insert(&mut self, event: &MetricEvent) {
        let identity = event.identity();
        trace!("METRICS | Aggregating {:?} {}", event.kind, identity);
        match event.kind {
            MetricKind::Counter => {
                *self.counters.entry(identity).or_insert(0.0) += event.value;
            }
            MetricKind::Gauge => {
                let current = self.gauges.entry(identity).or_insert(0.0);
                match event.mode {
                    GaugeMode::Set => *current = event.value,
                    GaugeMode::Increment => *current += event.value,
                    GaugeMode::Decrement => *current -= event.value,
                }
            }
            MetricKind::Histogram => {
                self.histograms
                    .entry(identity)
                    .or_default()
                    .push(event.value);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty()
    }

    #[must_use]
    pub fn series_count(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.histograms.len()
    }

    pub fn clear(&mut self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
    }

    /// Drains every series into a snapshot stamped with `window_start` and tagged
    /// with `service`. Returns `None` when nothing was aggregated.
    ///
    /// Series are ordered by their identity so payloads are deterministic.
    pub fn snapshot(&mut self, window_start: DateTime<Utc>, service: &str) -> Option<MetricsSnapshot> {
        if self.is_empty() {
            return None;
        }

        let counters = sorted(self.counters.drain())
            .into_iter()
            .map(|(identity, value)| CounterMessage {
                timestamp: window_start,
                metric_name: identity.name.to_string(),
                value,
                tags: identity.tags.with_service(service),
            })
            .collect();

        let gauges = sorted(self.gauges.drain())
            .into_iter()
            .map(|(identity, value)| GaugeMessage {
                timestamp: window_start,
                metric_name: identity.name.to_string(),
                value,
                tags: identity.tags.with_service(service),
            })
            .collect();

        let histograms = sorted(self.histograms.drain())
            .into_iter()
            .map(|(identity, values)| HistogramMessage {
                timestamp: window_start,
                metric_name: identity.name.to_string(),
                values,
                tags: identity.tags.with_service(service),
            })
            .collect();

        Some(MetricsSnapshot {
            counters,
            gauges,
            histograms,
        })
    }
}

fn sorted<V>(entries: impl Iterator<Item = (MetricIdentity, V)>) -> Vec<(MetricIdentity, V)> {
    let mut keyed: Vec<(String, MetricIdentity, V)> = entries
        .map(|(identity, value)| (identity.to_string(), identity, value))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed
        .into_iter()
        .map(|(_, identity, value)| (identity, value))
        .collect()
}
