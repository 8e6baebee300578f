// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared HTTP client construction.
//!
//! One `reqwest::Client` is built per agent and cloned into every component
//! that talks to the backend, so all of them share one connection pool.

use std::error::Error;
use std::time::Duration;
use tracing::error;

use crate::config::AgentConfig;

/// Returns a client configured from `config`.
///
/// If the configured client cannot be built the error is logged and reqwest's
/// default client is returned, so the agent keeps running.
#[must_use]
pub fn get_client(config: &AgentConfig) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to build HTTP client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        }
    }
}

fn build_client(config: &AgentConfig) -> Result<reqwest::Client, Box<dyn Error>> {
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()?;
    Ok(client)
}
