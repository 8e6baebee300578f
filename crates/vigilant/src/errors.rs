// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while building or validating an [`AgentConfig`](crate::config::AgentConfig).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing backend token")]
    MissingToken,

    #[error("Missing ingestion endpoint")]
    MissingEndpoint,

    #[error("Invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Failure to deliver a payload to the backend.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// The payload could not be serialized; data is dropped.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// Transport error or a non-2xx answer from the backend.
    #[error("Failed to reach destination ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Service instance is not registered")]
    NotRegistered,

    #[error("Waiting for registration was cancelled")]
    Cancelled,

    #[error(transparent)]
    Shipping(#[from] ShippingError),

    #[error("Invalid registration response: {0}")]
    InvalidResponse(String),
}
