// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire representation of everything the agent ships.
//!
//! Every request to the ingestion endpoint carries one envelope: the backend
//! token, a `type` discriminator and the items of that single payload kind.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::attributes::Attributes;
use crate::log_level::LogLevel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[display("logs")]
    Logs,
    #[display("errors")]
    Errors,
    #[display("alerts")]
    Alerts,
    #[display("metrics")]
    Metrics,
}

impl PayloadKind {
    /// Prefix of the agent's own diagnostics about this stream.
    #[must_use]
    pub fn log_prefix(self) -> &'static str {
        match self {
            PayloadKind::Logs => "LOGS",
            PayloadKind::Errors => "ERRORS",
            PayloadKind::Alerts => "ALERTS",
            PayloadKind::Metrics => "METRICS",
        }
    }
}

/// An item that can travel through a [`Batcher`](crate::batcher::Batcher).
pub trait BatchItem: Serialize + Send + Sync + 'static {
    const KIND: PayloadKind;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub body: String,
    pub attributes: Attributes,
}

impl BatchItem for LogMessage {
    const KIND: PayloadKind = PayloadKind::Logs;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub type_name: String,
    pub message: String,
    /// Messages of the `source()` chain, outermost first.
    pub causes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

/// Source location of the `capture_error` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub timestamp: DateTime<Utc>,
    pub details: ErrorDetails,
    pub location: ErrorLocation,
    pub attributes: Attributes,
}

impl BatchItem for ErrorMessage {
    const KIND: PayloadKind = PayloadKind::Errors;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertMessage {
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub attributes: Attributes,
}

impl BatchItem for AlertMessage {
    const KIND: PayloadKind = PayloadKind::Alerts;
}

/// Envelope for the log, error and alert streams.
#[derive(Debug, Serialize)]
pub struct MessageBatch<'a, T: BatchItem> {
    pub token: &'a str,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    pub items: &'a [T],
}

impl<'a, T: BatchItem> MessageBatch<'a, T> {
    pub fn new(token: &'a str, items: &'a [T]) -> Self {
        Self {
            token,
            kind: T::KIND,
            items,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CounterMessage {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GaugeMessage {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistogramMessage {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    /// Raw observations in the order they were applied.
    pub values: Vec<f64>,
    pub tags: BTreeMap<String, String>,
}

/// Aggregated metrics of one window, attributed to one service instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: Vec<CounterMessage>,
    pub gauges: Vec<GaugeMessage>,
    pub histograms: Vec<HistogramMessage>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.histograms.len()
    }
}

/// Envelope for one metrics snapshot.
#[derive(Debug, Serialize)]
pub struct MetricsBatch<'a> {
    pub token: &'a str,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    pub metrics_counters: &'a [CounterMessage],
    pub metrics_gauges: &'a [GaugeMessage],
    pub metrics_histograms: &'a [HistogramMessage],
}

impl<'a> MetricsBatch<'a> {
    #[must_use]
    pub fn new(token: &'a str, snapshot: &'a MetricsSnapshot) -> Self {
        Self {
            token,
            kind: PayloadKind::Metrics,
            metrics_counters: &snapshot.counters,
            metrics_gauges: &snapshot.gauges,
            metrics_histograms: &snapshot.histograms,
        }
    }
}
