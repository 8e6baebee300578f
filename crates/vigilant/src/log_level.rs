// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Severity of application log records.
//!
//! The agent drops every record below the configured minimum level before it
//! reaches the console passthrough or the log batcher. Levels are ordered from
//! most to least verbose: `Trace < Debug < Info < Warn < Error`.
//!
//! The minimum level can be set via:
//! - **Environment variable**: `VIGILANT_LOG_LEVEL=debug`
//! - **Programmatically**: `AgentConfigBuilder::with_level(LogLevel::Debug)`
//!
//! If no level is configured every record is forwarded (`Trace`).

use std::str::FromStr;

use serde::Serialize;

use crate::errors::ConfigError;

/// Severity attached to every [`LogMessage`](crate::messages::LogMessage).
///
/// The variant order is significant: `PartialOrd` is derived so that
/// `level >= minimum` decides whether a record is kept.
///
/// ```
/// use vigilant::log_level::LogLevel;
/// use std::str::FromStr;
///
/// assert!(LogLevel::Error > LogLevel::Info);
/// assert_eq!(LogLevel::from_str("WARN").unwrap(), LogLevel::Warn);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Extremely verbose diagnostics. This is the default minimum level.
    #[default]
    Trace,
    Debug,
    Info,
    /// Hazardous situations that may lead to errors.
    Warn,
    /// Serious failures of the application.
    Error,
}

/// Uppercase label used by the console passthrough, e.g. `[INFO]`.
impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl LogLevel {
    /// Returns `true` when a record at `self` passes a filter set to `minimum`.
    #[must_use]
    pub fn is_enabled(self, minimum: LogLevel) -> bool {
        self >= minimum
    }
}

/// Case-insensitive parsing; `warning` is accepted as an alias of `warn`.
impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}
