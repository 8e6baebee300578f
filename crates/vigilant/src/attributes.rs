// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed key/value metadata attached to logs, errors and alerts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single attribute value. Kept typed until serialization, where it becomes
/// the matching native JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::String(s) => serializer.serialize_str(s),
            AttributeValue::Int(i) => serializer.serialize_i64(*i),
            // NaN and infinities have no JSON representation
            AttributeValue::Float(v) if !v.is_finite() => serializer.collect_str(v),
            AttributeValue::Float(v) => serializer.serialize_f64(*v),
            AttributeValue::Bool(b) => serializer.serialize_bool(*b),
            AttributeValue::Time(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        AttributeValue::String(value.clone())
    }
}

macro_rules! int_attribute {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttributeValue {
                fn from(value: $t) -> Self {
                    AttributeValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_attribute!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(f64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Time(value)
    }
}

/// Attribute set keyed by name. Keys are unique and iterate in sorted order,
/// so the serialized form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Overlays `other` on top of `self`; keys present in both take `other`'s value.
    pub fn extend_from(&mut self, other: &Attributes) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Parses the `k:v,k2:v2` form used by `VIGILANT_ATTRIBUTES`. Entries
    /// without a `:` are skipped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once(':')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// Space separated `key=value` pairs, as printed by the console passthrough.
impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (key, value) in iter {
            attributes.insert(key, value);
        }
        attributes
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Attributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_serializes_native_json_values() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let attributes = Attributes::new()
            .with("user", "ada")
            .with("attempt", 3)
            .with("ratio", 0.5)
            .with("cached", true)
            .with("at", at);

        let value = serde_json::to_value(&attributes).expect("serialize");
        assert_eq!(
            value,
            json!({
                "at": "2024-03-01T12:00:00.000Z",
                "attempt": 3,
                "cached": true,
                "ratio": 0.5,
                "user": "ada",
            })
        );
    }

    #[test]
    fn test_non_finite_float_becomes_string() {
        let attributes = Attributes::from([("ratio", f64::NAN)]);
        let value = serde_json::to_value(&attributes).expect("serialize");
        assert_eq!(value, json!({"ratio": "NaN"}));
    }

    #[test]
    fn test_display_is_sorted() {
        let attributes = Attributes::from([("b", "2"), ("a", "1")]);
        assert_eq!(attributes.to_string(), "a=1 b=2");
    }

    #[test]
    fn test_extend_from_overrides() {
        let mut base = Attributes::from([("env", "dev"), ("region", "eu")]);
        base.extend_from(&Attributes::from([("env", "prod")]));
        assert_eq!(base.get("env"), Some(&AttributeValue::from("prod")));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_parse() {
        let attributes = Attributes::parse("env:prod, team : core,broken,:x");
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes.get("team"), Some(&AttributeValue::from("core")));
    }
}
