// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives the process-wide agent with a synthetic workload until Ctrl-C.
//!
//! Configuration comes from the `VIGILANT_*` variables; `VIGILANT_AGENT_LOG`
//! filters the agent's own diagnostics (default `info`).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod logger;

use std::env;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use vigilant::{AgentConfig, Attributes, GaugeMode, SortedTags};

const WORKLOAD_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("VIGILANT_AGENT_LOG")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    let filter = match EnvFilter::try_new(&env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid VIGILANT_AGENT_LOG '{log_level}': {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
        return;
    }
    debug!("Logging subsystem enabled");

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    let agent = match vigilant::init(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Unable to start agent: {}", e);
            return;
        }
    };
    info!("Sending synthetic telemetry as {}, press Ctrl-C to stop", agent.name());

    let mut ticker = interval(WORKLOAD_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut iteration: u32 = 0;
    loop {
        tokio::select! {
            biased;
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Unable to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                iteration = iteration.wrapping_add(1);
                emit(iteration);
            }
        }
    }

    info!("Shutting down");
    vigilant::shutdown().await;
}

fn emit(iteration: u32) {
    vigilant::info(
        "synthetic request handled",
        Attributes::new().with("iteration", iteration),
    );
    vigilant::counter("smoke.requests", 1.0, [("route", "/checkout")]);
    vigilant::gauge(
        "smoke.inflight",
        f64::from(iteration % 7),
        GaugeMode::Set,
        SortedTags::default(),
    );
    vigilant::histogram(
        "smoke.latency_ms",
        f64::from(10 + iteration % 40),
        [("route", "/checkout")],
    );
    if iteration % 30 == 0 {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
        vigilant::capture_error(&timeout, Attributes::new().with("iteration", iteration));
    }
    if iteration % 120 == 0 {
        vigilant::send_alert("synthetic alert", Attributes::new());
    }
}
