// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Console mirror of accepted events.
//!
//! When passthrough is enabled every event the agent accepts is also printed to
//! stdout, whether or not its stream ships anything. This is application output,
//! not agent diagnostics, so it bypasses `tracing`.

use crate::attributes::Attributes;
use crate::log_level::LogLevel;
use crate::metrics::event::SortedTags;

fn with_suffix(mut line: String, suffix: impl std::fmt::Display) -> String {
    let suffix = suffix.to_string();
    if !suffix.is_empty() {
        line.push(' ');
        line.push_str(&suffix);
    }
    line
}

#[must_use]
pub fn format_log(level: LogLevel, message: &str, attributes: &Attributes) -> String {
    with_suffix(format!("[{}] {}", level.as_ref(), message), attributes)
}

#[must_use]
pub fn format_error(message: &str, attributes: &Attributes) -> String {
    format_log(LogLevel::Error, message, attributes)
}

#[must_use]
pub fn format_alert(title: &str, attributes: &Attributes) -> String {
    with_suffix(format!("[ALERT] {title}"), attributes)
}

#[must_use]
pub fn format_metric(name: &str, value: f64, tags: &SortedTags) -> String {
    let tags = tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    with_suffix(format!("[METRIC] {name} {value}"), tags)
}

pub fn print_log(level: LogLevel, message: &str, attributes: &Attributes) {
    println!("{}", format_log(level, message, attributes));
}

pub fn print_error(message: &str, attributes: &Attributes) {
    println!("{}", format_error(message, attributes));
}

pub fn print_alert(title: &str, attributes: &Attributes) {
    println!("{}", format_alert(title, attributes));
}

pub fn print_metric(name: &str, value: f64, tags: &SortedTags) {
    println!("{}", format_metric(name, value, tags));
}
