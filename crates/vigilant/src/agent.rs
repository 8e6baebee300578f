// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The agent: composition root of every delivery pipeline.
//!
//! ```text
//!   log/debug/...  ──> level filter ──> passthrough ──> Batcher<LogMessage>   ──┐
//!   capture_error  ──────────────────> passthrough ──> Batcher<ErrorMessage> ──┼──> POST /api/message
//!   send_alert     ──────────────────> passthrough ──> Batcher<AlertMessage> ──┤
//!   counter/gauge/histogram ─────────> passthrough ──> MetricCollector ────────┘
//!                                                      (Sender + Registration)
//! ```
//!
//! Submission methods never block and never fail. A stream disabled by its noop
//! toggle is neither started nor fed; passthrough still prints its events.

use chrono::Utc;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::panic::Location;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::attributes::{AttributeValue, Attributes};
use crate::batcher::Batcher;
use crate::config::AgentConfig;
use crate::errors::ConfigError;
use crate::http::get_client;
use crate::intake::IntakeClient;
use crate::log_level::LogLevel;
use crate::messages::{
    AlertMessage, ErrorDetails, ErrorLocation, ErrorMessage, LogMessage,
};
use crate::metrics::collector::{MetricCollector, MetricsHandle};
use crate::metrics::event::{GaugeMode, MetricEvent, SortedTags};
use crate::metrics::sender::MetricSender;
use crate::passthrough;
use crate::registration::{RegistrationConfig, RegistrationHandler};

/// Attribute carrying the configured service name on every log, error and alert.
pub const SERVICE_NAME_ATTRIBUTE: &str = "service.name";

pub struct Agent {
    name: String,
    level: LogLevel,
    passthrough: bool,
    global_attributes: RwLock<Attributes>,
    logs: Option<Batcher<LogMessage>>,
    errors: Option<Batcher<ErrorMessage>>,
    alerts: Option<Batcher<AlertMessage>>,
    metrics: Option<MetricCollector>,
    metrics_handle: Option<MetricsHandle>,
    cancel: CancellationToken,
}

impl Agent {
    /// Builds every enabled pipeline without starting any of them.
    pub fn new(config: AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let intake = IntakeClient::new(get_client(&config), &config.base_url(), &config.token);

        let logs = (!config.noop_logs)
            .then(|| Batcher::new(intake.clone(), config.batch, cancel.child_token()));
        let errors = (!config.noop_errors)
            .then(|| Batcher::new(intake.clone(), config.batch, cancel.child_token()));
        let alerts = (!config.noop_alerts)
            .then(|| Batcher::new(intake.clone(), config.batch, cancel.child_token()));

        let metrics = (!config.noop_metrics).then(|| {
            let registration = Arc::new(RegistrationHandler::new(
                intake.clone(),
                &config.name,
                RegistrationConfig {
                    interval: config.registration_interval,
                    ..RegistrationConfig::default()
                },
                CancellationToken::new(),
            ));
            // the sender must outlive the collector's final flush
            let sender = MetricSender::new(intake.clone(), CancellationToken::new());
            MetricCollector::new(
                config.metric_interval,
                config.metric_queue_capacity,
                sender,
                registration,
                cancel.child_token(),
            )
        });
        let metrics_handle = metrics.as_ref().map(MetricCollector::handle);

        Ok(Self {
            name: config.name,
            level: config.level,
            passthrough: config.passthrough,
            global_attributes: RwLock::new(config.attributes),
            logs,
            errors,
            alerts,
            metrics,
            metrics_handle,
            cancel,
        })
    }

    /// Launches the background tasks of every enabled pipeline. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) {
        if let Some(logs) = &self.logs {
            logs.start();
        }
        if let Some(errors) = &self.errors {
            errors.start();
        }
        if let Some(alerts) = &self.alerts {
            alerts.start();
        }
        if let Some(metrics) = &self.metrics {
            metrics.start();
        }
        info!("Agent started for service {}", self.name);
    }

    /// Stops every pipeline after shipping what is still buffered.
    pub async fn shutdown(&self) {
        debug!("Shutting down agent for service {}", self.name);
        self.cancel.cancel();

        tokio::join!(
            async {
                if let Some(logs) = &self.logs {
                    logs.stop().await;
                }
            },
            async {
                if let Some(errors) = &self.errors {
                    errors.stop().await;
                }
            },
            async {
                if let Some(alerts) = &self.alerts {
                    alerts.stop().await;
                }
            },
        );
        if let Some(metrics) = &self.metrics {
            metrics.stop().await;
        }
        info!("Agent for service {} stopped", self.name);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total of events dropped because a queue was full or already stopped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.logs.as_ref().map_or(0, Batcher::dropped)
            + self.errors.as_ref().map_or(0, Batcher::dropped)
            + self.alerts.as_ref().map_or(0, Batcher::dropped)
            + self.metrics_handle.as_ref().map_or(0, MetricsHandle::dropped)
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.global_attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub fn remove_attribute(&self, key: &str) {
        self.global_attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Global attributes, overridden by `call_site`, plus `service.name`.
    fn merged_attributes(&self, call_site: &Attributes) -> Attributes {
        let mut merged = self
            .global_attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        merged.extend_from(call_site);
        merged.insert(SERVICE_NAME_ATTRIBUTE, self.name.as_str());
        merged
    }

    pub fn log(&self, level: LogLevel, message: &str, attributes: Attributes) {
        let Some(record) = self.log_message(level, message, &attributes) else {
            return;
        };
        if self.passthrough {
            passthrough::print_log(level, message, &record.attributes);
        }
        if let Some(logs) = &self.logs {
            logs.submit(record);
        }
    }

    /// Builds the log record, or `None` when `level` is below the minimum.
    fn log_message(
        &self,
        level: LogLevel,
        message: &str,
        attributes: &Attributes,
    ) -> Option<LogMessage> {
        if !level.is_enabled(self.level) {
            return None;
        }
        Some(LogMessage {
            timestamp: Utc::now(),
            level,
            body: message.to_string(),
            attributes: self.merged_attributes(attributes),
        })
    }

    pub fn trace(&self, message: &str, attributes: Attributes) {
        self.log(LogLevel::Trace, message, attributes);
    }

    pub fn debug(&self, message: &str, attributes: Attributes) {
        self.log(LogLevel::Debug, message, attributes);
    }

    pub fn info(&self, message: &str, attributes: Attributes) {
        self.log(LogLevel::Info, message, attributes);
    }

    pub fn warn(&self, message: &str, attributes: Attributes) {
        self.log(LogLevel::Warn, message, attributes);
    }

    pub fn error(&self, message: &str, attributes: Attributes) {
        self.log(LogLevel::Error, message, attributes);
    }

    /// Reports `error` with its `source()` chain and the caller's location.
    #[track_caller]
    pub fn capture_error<E: Error + ?Sized>(&self, error: &E, attributes: Attributes) {
        let record = self.error_message(error, &attributes, Location::caller());
        if self.passthrough {
            passthrough::print_error(&record.details.message, &record.attributes);
        }
        if let Some(errors) = &self.errors {
            errors.submit(record);
        }
    }

    fn error_message<E: Error + ?Sized>(
        &self,
        error: &E,
        attributes: &Attributes,
        location: &Location<'_>,
    ) -> ErrorMessage {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        let stacktrace = (backtrace.status() == BacktraceStatus::Captured)
            .then(|| backtrace.to_string());

        ErrorMessage {
            timestamp: Utc::now(),
            details: ErrorDetails {
                type_name: std::any::type_name::<E>().to_string(),
                message: error.to_string(),
                causes,
                stacktrace,
            },
            location: ErrorLocation {
                file: location.file().to_string(),
                line: location.line(),
                column: location.column(),
            },
            attributes: self.merged_attributes(attributes),
        }
    }

    /// Sends an alert. Alerts without a title are ignored.
    pub fn send_alert(&self, title: &str, attributes: Attributes) {
        if title.trim().is_empty() {
            return;
        }
        let record = AlertMessage {
            timestamp: Utc::now(),
            title: title.to_string(),
            attributes: self.merged_attributes(&attributes),
        };
        if self.passthrough {
            passthrough::print_alert(title, &record.attributes);
        }
        if let Some(alerts) = &self.alerts {
            alerts.submit(record);
        }
    }

    /// Records a counter increment. A caller-supplied `service` tag is
    /// ignored: every series is tagged with the registered instance instead.
    pub fn counter(&self, name: &str, value: f64, tags: impl Into<SortedTags>) {
        let event = MetricEvent::counter(name, value, tags.into());
        self.record(event);
    }

    pub fn gauge(&self, name: &str, value: f64, mode: GaugeMode, tags: impl Into<SortedTags>) {
        let event = MetricEvent::gauge(name, value, mode, tags.into());
        self.record(event);
    }

    pub fn histogram(&self, name: &str, value: f64, tags: impl Into<SortedTags>) {
        let event = MetricEvent::histogram(name, value, tags.into());
        self.record(event);
    }

    fn record(&self, event: MetricEvent) {
        if self.passthrough {
            passthrough::print_metric(&event.name, event.value, &event.tags);
        }
        if let Some(handle) = &self.metrics_handle {
            handle.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl Error for Inner {}

    #[derive(Debug)]
    struct Outer(Inner);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("failed to load profile")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    fn agent(level: LogLevel) -> Agent {
        let config = AgentConfig {
            name: "checkout".to_string(),
            level,
            attributes: Attributes::from([("env", "prod"), ("region", "eu")]),
            ..AgentConfig::noop()
        };
        Agent::new(config).expect("agent")
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            Agent::new(AgentConfig::default()),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn test_level_filter() {
        let agent = agent(LogLevel::Warn);
        assert!(agent.log_message(LogLevel::Info, "hidden", &Attributes::new()).is_none());
        assert!(agent.log_message(LogLevel::Warn, "shown", &Attributes::new()).is_some());
        assert!(agent.log_message(LogLevel::Error, "shown", &Attributes::new()).is_some());
    }

    #[test]
    fn test_attribute_precedence() {
        let agent = agent(LogLevel::Trace);
        let record = agent
            .log_message(
                LogLevel::Info,
                "hello",
                &Attributes::from([("env", "staging"), ("service.name", "spoofed")]),
            )
            .expect("record");
        assert_eq!(record.attributes.get("env"), Some(&AttributeValue::from("staging")));
        assert_eq!(record.attributes.get("region"), Some(&AttributeValue::from("eu")));
        assert_eq!(
            record.attributes.get(SERVICE_NAME_ATTRIBUTE),
            Some(&AttributeValue::from("checkout"))
        );
    }

    #[test]
    fn test_runtime_global_attributes() {
        let agent = agent(LogLevel::Trace);
        agent.set_attribute("version", 3);
        agent.remove_attribute("region");
        let merged = agent.merged_attributes(&Attributes::new());
        assert_eq!(merged.get("version"), Some(&AttributeValue::Int(3)));
        assert!(merged.get("region").is_none());
    }

    #[test]
    fn test_error_message_captures_chain_and_location() {
        let agent = agent(LogLevel::Trace);
        let error = Outer(Inner);
        let record = agent.error_message(&error, &Attributes::new(), Location::caller());

        assert_eq!(record.details.message, "failed to load profile");
        assert_eq!(record.details.causes, vec!["connection refused".to_string()]);
        assert!(record.details.type_name.ends_with("Outer"));
        assert!(record.location.file.ends_with("agent.rs"));
        assert!(record.location.line > 0);
    }

    #[tokio::test]
    async fn test_noop_agent_accepts_everything() {
        let agent = agent(LogLevel::Trace);
        agent.start();
        agent.info("hello", Attributes::new());
        agent.capture_error(&Outer(Inner), Attributes::new());
        agent.send_alert("", Attributes::new());
        agent.send_alert("disk full", Attributes::new());
        agent.counter("jobs", 1.0, SortedTags::default());
        agent.gauge("pool", 2.0, GaugeMode::Increment, [("db", "main")]);
        agent.histogram("latency", 0.2, SortedTags::default());
        agent.shutdown().await;
        assert_eq!(agent.dropped(), 0);
    }
}
