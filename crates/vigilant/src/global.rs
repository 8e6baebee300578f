// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide agent.
//!
//! [`init`] installs and starts one agent for the whole process. The free
//! functions below forward to it; before `init` they do nothing and warn once.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::warn;

use crate::agent::Agent;
use crate::attributes::{AttributeValue, Attributes};
use crate::config::AgentConfig;
use crate::errors::ConfigError;
use crate::log_level::LogLevel;
use crate::metrics::event::{GaugeMode, SortedTags};

static AGENT: OnceLock<Agent> = OnceLock::new();
static WARNED: AtomicBool = AtomicBool::new(false);

/// Installs and starts the process-wide agent. Only the first call has an
/// effect; later calls return the agent installed by the first one.
///
/// Must be called from within a tokio runtime.
pub fn init(config: AgentConfig) -> Result<&'static Agent, ConfigError> {
    if let Some(agent) = AGENT.get() {
        return Ok(agent);
    }
    let agent = Agent::new(config)?;
    let mut installed = false;
    let agent = AGENT.get_or_init(|| {
        installed = true;
        agent
    });
    if installed {
        agent.start();
    }
    Ok(agent)
}

/// The process-wide agent, if [`init`] has been called.
#[must_use]
pub fn agent() -> Option<&'static Agent> {
    AGENT.get()
}

/// Flushes and stops the process-wide agent. Does nothing before [`init`].
pub async fn shutdown() {
    if let Some(agent) = AGENT.get() {
        agent.shutdown().await;
    }
}

fn with_agent(f: impl FnOnce(&Agent)) {
    match AGENT.get() {
        Some(agent) => f(agent),
        None => {
            if !WARNED.swap(true, Ordering::Relaxed) {
                warn!("Telemetry submitted before vigilant::init, ignoring");
            }
        }
    }
}

pub fn log(level: LogLevel, message: &str, attributes: Attributes) {
    with_agent(|agent| agent.log(level, message, attributes));
}

pub fn trace(message: &str, attributes: Attributes) {
    log(LogLevel::Trace, message, attributes);
}

pub fn debug(message: &str, attributes: Attributes) {
    log(LogLevel::Debug, message, attributes);
}

pub fn info(message: &str, attributes: Attributes) {
    log(LogLevel::Info, message, attributes);
}

pub fn warn(message: &str, attributes: Attributes) {
    log(LogLevel::Warn, message, attributes);
}

pub fn error(message: &str, attributes: Attributes) {
    log(LogLevel::Error, message, attributes);
}

#[track_caller]
pub fn capture_error<E: Error + ?Sized>(error: &E, attributes: Attributes) {
    match AGENT.get() {
        Some(agent) => agent.capture_error(error, attributes),
        None => with_agent(|_| {}),
    }
}

pub fn send_alert(title: &str, attributes: Attributes) {
    with_agent(|agent| agent.send_alert(title, attributes));
}

pub fn counter(name: &str, value: f64, tags: impl Into<SortedTags>) {
    with_agent(|agent| agent.counter(name, value, tags));
}

pub fn gauge(name: &str, value: f64, mode: GaugeMode, tags: impl Into<SortedTags>) {
    with_agent(|agent| agent.gauge(name, value, mode, tags));
}

pub fn histogram(name: &str, value: f64, tags: impl Into<SortedTags>) {
    with_agent(|agent| agent.histogram(name, value, tags));
}

pub fn set_attribute(key: impl Into<String>, value: impl Into<AttributeValue>) {
    with_agent(|agent| agent.set_attribute(key, value));
}

pub fn remove_attribute(key: &str) {
    with_agent(|agent| agent.remove_attribute(key));
}
