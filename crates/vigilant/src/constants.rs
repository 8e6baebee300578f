// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend paths and default tunables.

use std::time::Duration;

/// Batch ingestion path for every payload kind.
pub const MESSAGE_PATH: &str = "/api/message";
pub const REGISTRATION_PATH: &str = "/api/registration";
pub const HEARTBEAT_PATH: &str = "/api/registration/heartbeat";

pub const DEFAULT_NAME: &str = "server-name";
pub const DEFAULT_ENDPOINT: &str = "ingress.vigilant.run";

/// Capacity of every batcher queue. Items submitted while it is full are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

/// Items per request. A batcher flushes as soon as its buffer reaches this size.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of each per-kind metric event channel.
pub const DEFAULT_METRIC_QUEUE_CAPACITY: usize = 1_000;

/// Capacity of the queue between the collector and the metric sender.
pub const SNAPSHOT_QUEUE_CAPACITY: usize = 100;

pub const DEFAULT_METRIC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REGISTRATION_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound accepted for the metric window and the registration tick.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Register attempts per registration tick before giving up until the next one.
pub const REGISTRATION_MAX_ATTEMPTS: u32 = 10;

/// Linear backoff unit between register attempts: attempt `n` waits `n` units.
pub const REGISTRATION_BACKOFF_STEP: Duration = Duration::from_millis(50);
