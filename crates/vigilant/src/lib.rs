// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Vigilant
//!
//! A telemetry agent embedded in the application process. It ships logs,
//! captured errors and alerts to the Vigilant backend in batches, and
//! aggregates counters, gauges and histograms into fixed, epoch-aligned
//! windows that are flushed once per interval on behalf of a registered
//! service instance.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = AgentConfigBuilder::new()
//!     .with_name("checkout")
//!     .with_token("tk_...")
//!     .build()?;
//! let agent = vigilant::Agent::new(config)?;
//! agent.start();
//! agent.info("order placed", Attributes::from([("order", "42")]));
//! agent.counter("orders", 1.0, [("region", "eu")]);
//! agent.shutdown().await;
//! ```
//!
//! The same calls exist as free functions over a process-wide agent installed
//! with [`init`]; before `init` they do nothing.
//!
//! ## Modules
//!
//! - [`agent`]: composition root, attribute merging, level filter, passthrough
//! - [`batcher`]: bounded queue and size/time triggered flush for one payload kind
//! - [`metrics`]: event channels, aggregation, window alignment and snapshot shipping
//! - [`registration`]: service instance register/heartbeat/deregister
//! - [`config`]: configuration struct, builder and `VIGILANT_*` environment loading

#![deny(clippy::all)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

pub mod agent;
pub mod attributes;
pub mod batcher;
pub mod config;
pub mod constants;
pub mod errors;
pub mod global;
pub mod http;
pub mod intake;
pub mod log_level;
pub mod messages;
pub mod metrics;
pub mod passthrough;
pub mod registration;

pub use agent::Agent;
pub use attributes::{AttributeValue, Attributes};
pub use config::{AgentConfig, AgentConfigBuilder};
pub use errors::{ConfigError, RegistrationError, ShippingError};
pub use global::{
    agent, capture_error, counter, debug, error, gauge, histogram, info, init, log,
    remove_attribute, send_alert, set_attribute, shutdown, trace, warn,
};
pub use log_level::LogLevel;
pub use metrics::event::{GaugeMode, SortedTags};
