// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::attributes::{AttributeValue, Attributes};
use crate::batcher::BatchConfig;
use crate::constants::{
    DEFAULT_ENDPOINT, DEFAULT_HTTP_TIMEOUT, DEFAULT_METRIC_INTERVAL,
    DEFAULT_METRIC_QUEUE_CAPACITY, DEFAULT_NAME, DEFAULT_REGISTRATION_INTERVAL, MAX_INTERVAL,
};
use crate::errors::ConfigError;
use crate::log_level::LogLevel;

/// Configuration of an [`Agent`](crate::agent::Agent).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Service name; reported as `service.name` and used for registration
    pub name: String,
    /// Minimum level of forwarded log records
    pub level: LogLevel,
    /// Backend token, sent as a bearer token and inside every envelope
    pub token: String,
    /// Ingestion host, or a full URL with scheme
    pub endpoint: String,
    /// Use `http://` instead of `https://`
    pub insecure: bool,
    /// Mirror accepted events to stdout
    pub passthrough: bool,
    pub noop_logs: bool,
    pub noop_errors: bool,
    pub noop_alerts: bool,
    pub noop_metrics: bool,
    /// Attributes added to every log, error and alert
    pub attributes: Attributes,
    pub metric_interval: Duration,
    pub http_timeout: Duration,
    pub batch: BatchConfig,
    pub registration_interval: Duration,
    pub metric_queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            level: LogLevel::Trace,
            token: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            insecure: false,
            passthrough: false,
            noop_logs: false,
            noop_errors: false,
            noop_alerts: false,
            noop_metrics: false,
            attributes: Attributes::new(),
            metric_interval: DEFAULT_METRIC_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            batch: BatchConfig::default(),
            registration_interval: DEFAULT_REGISTRATION_INTERVAL,
            metric_queue_capacity: DEFAULT_METRIC_QUEUE_CAPACITY,
        }
    }
}

impl AgentConfig {
    /// A configuration that ships nothing and prints every event to stdout.
    /// Useful for tests of instrumented code.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            token: "noop".to_string(),
            passthrough: true,
            noop_logs: true,
            noop_errors: true,
            noop_alerts: true,
            noop_metrics: true,
            ..Self::default()
        }
    }

    /// Reads the configuration from `VIGILANT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let level = match get("VIGILANT_LOG_LEVEL") {
            Some(raw) => LogLevel::from_str(&raw)?,
            None => defaults.level,
        };
        let metric_interval = match get("VIGILANT_METRIC_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_number("VIGILANT_METRIC_INTERVAL_SECS", &raw)?),
            None => defaults.metric_interval,
        };
        let http_timeout = match get("VIGILANT_HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("VIGILANT_HTTP_TIMEOUT_SECS", &raw)?),
            None => defaults.http_timeout,
        };

        let config = Self {
            name: get("VIGILANT_NAME").unwrap_or(defaults.name),
            level,
            token: get("VIGILANT_TOKEN").unwrap_or_default(),
            endpoint: get("VIGILANT_ENDPOINT").unwrap_or(defaults.endpoint),
            insecure: parse_flag("VIGILANT_INSECURE", get("VIGILANT_INSECURE"))?,
            passthrough: parse_flag("VIGILANT_PASSTHROUGH", get("VIGILANT_PASSTHROUGH"))?,
            noop_logs: parse_flag("VIGILANT_NOOP_LOGS", get("VIGILANT_NOOP_LOGS"))?,
            noop_errors: parse_flag("VIGILANT_NOOP_ERRORS", get("VIGILANT_NOOP_ERRORS"))?,
            noop_alerts: parse_flag("VIGILANT_NOOP_ALERTS", get("VIGILANT_NOOP_ALERTS"))?,
            noop_metrics: parse_flag("VIGILANT_NOOP_METRICS", get("VIGILANT_NOOP_METRICS"))?,
            attributes: get("VIGILANT_ATTRIBUTES")
                .map(|raw| Attributes::parse(&raw))
                .unwrap_or_default(),
            metric_interval,
            http_timeout,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        let positive = [
            ("metric_interval", self.metric_interval),
            ("http_timeout", self.http_timeout),
            ("batch.flush_interval", self.batch.flush_interval),
            ("registration_interval", self.registration_interval),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        let bounded = [
            ("metric_interval", self.metric_interval),
            ("registration_interval", self.registration_interval),
        ];
        for (field, value) in bounded {
            if value > MAX_INTERVAL {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be at most {}s", MAX_INTERVAL.as_secs()),
                });
            }
        }
        let non_empty = [
            ("batch.queue_capacity", self.batch.queue_capacity),
            ("batch.max_batch_size", self.batch.max_batch_size),
            ("metric_queue_capacity", self.metric_queue_capacity),
        ];
        for (field, value) in non_empty {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Scheme plus host of the backend. An endpoint that already carries a
    /// scheme is used as is.
    #[must_use]
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{endpoint}")
    }
}

fn parse_flag(field: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            field,
            reason: format!("'{raw}': {e}"),
        })
}

/// Fluent construction of an [`AgentConfig`]. The token has no default and
/// must be set before [`AgentConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.config.token = token.into();
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.config.insecure = insecure;
        self
    }

    #[must_use]
    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.config.passthrough = passthrough;
        self
    }

    #[must_use]
    pub fn with_noop_logs(mut self, noop: bool) -> Self {
        self.config.noop_logs = noop;
        self
    }

    #[must_use]
    pub fn with_noop_errors(mut self, noop: bool) -> Self {
        self.config.noop_errors = noop;
        self
    }

    #[must_use]
    pub fn with_noop_alerts(mut self, noop: bool) -> Self {
        self.config.noop_alerts = noop;
        self
    }

    #[must_use]
    pub fn with_noop_metrics(mut self, noop: bool) -> Self {
        self.config.noop_metrics = noop;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.config.attributes.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.config.attributes.extend_from(&attributes);
        self
    }

    #[must_use]
    pub fn with_metric_interval(mut self, interval: Duration) -> Self {
        self.config.metric_interval = interval;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    #[must_use]
    pub fn with_registration_interval(mut self, interval: Duration) -> Self {
        self.config.registration_interval = interval;
        self
    }

    #[must_use]
    pub fn with_metric_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.metric_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_requires_token() {
        assert_eq!(AgentConfig::default().validate(), Err(ConfigError::MissingToken));
        assert!(AgentConfig::noop().validate().is_ok());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[("VIGILANT_TOKEN", "tk")])).unwrap();
        assert_eq!(config.name, "server-name");
        assert_eq!(config.endpoint, "ingress.vigilant.run");
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.metric_interval, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert!(!config.insecure);
        assert!(config.attributes.is_empty());
    }

    #[test]
    fn test_from_lookup_reads_everything() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("VIGILANT_TOKEN", "tk"),
            ("VIGILANT_NAME", "checkout"),
            ("VIGILANT_ENDPOINT", "localhost:4001"),
            ("VIGILANT_INSECURE", "true"),
            ("VIGILANT_PASSTHROUGH", "1"),
            ("VIGILANT_LOG_LEVEL", "WARN"),
            ("VIGILANT_NOOP_ALERTS", "yes"),
            ("VIGILANT_ATTRIBUTES", "env:prod,team:core"),
            ("VIGILANT_METRIC_INTERVAL_SECS", "10"),
            ("VIGILANT_HTTP_TIMEOUT_SECS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.name, "checkout");
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.insecure && config.passthrough && config.noop_alerts);
        assert!(!config.noop_logs);
        assert_eq!(config.attributes.len(), 2);
        assert_eq!(config.metric_interval, Duration::from_secs(10));
        assert_eq!(config.http_timeout, Duration::from_secs(2));
        assert_eq!(config.base_url(), "http://localhost:4001");
    }

    #[test]
    fn test_from_lookup_missing_token() {
        assert_eq!(
            AgentConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingToken)
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert_eq!(
            AgentConfig::from_lookup(lookup(&[("VIGILANT_TOKEN", "tk"), ("VIGILANT_LOG_LEVEL", "loud")])),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
        assert!(matches!(
            AgentConfig::from_lookup(lookup(&[
                ("VIGILANT_TOKEN", "tk"),
                ("VIGILANT_INSECURE", "maybe")
            ])),
            Err(ConfigError::InvalidValue { field: "VIGILANT_INSECURE", .. })
        ));
        assert!(matches!(
            AgentConfig::from_lookup(lookup(&[
                ("VIGILANT_TOKEN", "tk"),
                ("VIGILANT_METRIC_INTERVAL_SECS", "0")
            ])),
            Err(ConfigError::InvalidValue { field: "metric_interval", .. })
        ));
    }

    #[test]
    fn test_from_lookup_rejects_oversized_intervals() {
        assert!(matches!(
            AgentConfig::from_lookup(lookup(&[
                ("VIGILANT_TOKEN", "tk"),
                ("VIGILANT_METRIC_INTERVAL_SECS", "18446744073709551615")
            ])),
            Err(ConfigError::InvalidValue { field: "metric_interval", .. })
        ));
        assert!(AgentConfig::from_lookup(lookup(&[
            ("VIGILANT_TOKEN", "tk"),
            ("VIGILANT_METRIC_INTERVAL_SECS", "86400")
        ]))
        .is_ok());
        assert!(matches!(
            AgentConfigBuilder::new()
                .with_token("tk")
                .with_registration_interval(MAX_INTERVAL + Duration::from_secs(1))
                .build(),
            Err(ConfigError::InvalidValue { field: "registration_interval", .. })
        ));
    }

    #[test]
    fn test_base_url() {
        let mut config = AgentConfig::noop();
        assert_eq!(config.base_url(), "https://ingress.vigilant.run");
        config.insecure = true;
        assert_eq!(config.base_url(), "http://ingress.vigilant.run");
        config.endpoint = "https://collector.internal/".to_string();
        assert_eq!(config.base_url(), "https://collector.internal");
    }

    #[test]
    fn test_builder() {
        assert_eq!(
            AgentConfigBuilder::new().build(),
            Err(ConfigError::MissingToken)
        );
        let config = AgentConfigBuilder::new()
            .with_token("tk")
            .with_name("billing")
            .with_attribute("region", "eu")
            .with_level(LogLevel::Info)
            .build()
            .unwrap();
        assert_eq!(config.name, "billing");
        assert_eq!(config.attributes.get("region"), Some(&AttributeValue::from("eu")));
        assert!(matches!(
            AgentConfigBuilder::new()
                .with_token("tk")
                .with_batch(BatchConfig {
                    max_batch_size: 0,
                    ..BatchConfig::default()
                })
                .build(),
            Err(ConfigError::InvalidValue { field: "batch.max_batch_size", .. })
        ));
    }
}
