// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use ustr::Ustr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// How a gauge observation modifies the current value of its series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GaugeMode {
    #[default]
    Set,
    Increment,
    Decrement,
}

/// Tag key naming the service instance a series is attributed to.
pub const SERVICE_TAG: &str = "service";

/// Tag set of a metric, sorted by key with unique keys.
///
/// When the same key is supplied more than once the first value wins. The
/// reserved [`SERVICE_TAG`] key is set at flush time and ignored here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SortedTags {
    values: Vec<(Ustr, Ustr)>,
}

pub const EMPTY_TAGS: SortedTags = SortedTags { values: Vec::new() };

impl SortedTags {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Wire form of the tags with an extra `service` tag naming the instance the
    /// series is attributed to.
    #[must_use]
    pub fn with_service(&self, service: &str) -> BTreeMap<String, String> {
        let mut tags: BTreeMap<String, String> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        tags.insert(SERVICE_TAG.to_string(), service.to_string());
        tags
    }
}

impl<K, V> FromIterator<(K, V)> for SortedTags
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values: Vec<(Ustr, Ustr)> = Vec::new();
        for (key, value) in iter {
            if key.as_ref() == SERVICE_TAG {
                continue;
            }
            let key = Ustr::from(key.as_ref());
            if values.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            values.push((key, Ustr::from(value.as_ref())));
        }
        // stable sort keeps the first-wins choice above intact
        values.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        SortedTags { values }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for SortedTags
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Aggregation key of a series: metric name plus its sorted tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricIdentity {
    pub name: Ustr,
    pub tags: SortedTags,
}

/// Deterministic textual form, e.g. `http.requests{method=GET,route=/}`.
impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        f.write_str("{")?;
        for (i, (key, value)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// One metric observation as emitted by application code.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    pub kind: MetricKind,
    pub name: Ustr,
    pub value: f64,
    pub mode: GaugeMode,
    pub tags: SortedTags,
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    fn new(kind: MetricKind, name: &str, value: f64, mode: GaugeMode, tags: SortedTags) -> Self {
        Self {
            kind,
            name: Ustr::from(name),
            value,
            mode,
            tags,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn counter(name: &str, value: f64, tags: SortedTags) -> Self {
        Self::new(MetricKind::Counter, name, value, GaugeMode::Set, tags)
    }

    #[must_use]
    pub fn gauge(name: &str, value: f64, mode: GaugeMode, tags: SortedTags) -> Self {
        Self::new(MetricKind::Gauge, name, value, mode, tags)
    }

    #[must_use]
    pub fn histogram(name: &str, value: f64, tags: SortedTags) -> Self {
        Self::new(MetricKind::Histogram, name, value, GaugeMode::Set, tags)
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn identity(&self) -> MetricIdentity {
        MetricIdentity {
            name: self.name,
            tags: self.tags.clone(),
        }
    }
}
