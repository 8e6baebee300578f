// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Epoch-aligned window arithmetic for the metric flush schedule.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Delay after a window boundary before the window is flushed, so events
/// recorded right at the boundary still land in it.
pub const FLUSH_GRACE: Duration = Duration::from_secs(1);

fn millis(interval: Duration) -> i64 {
    i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// Rounds `at` down to the start of the window of length `interval` that
/// contains it.
#[must_use]
pub fn truncate(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = millis(interval);
    let ts = at.timestamp_millis();
    let aligned = ts - ts.rem_euclid(step);
    DateTime::from_timestamp_millis(aligned).unwrap_or(at)
}

fn delta(interval: Duration) -> Option<TimeDelta> {
    TimeDelta::try_milliseconds(millis(interval))
}

/// Instant of the first flush: the end of the current window plus the grace.
/// `None` when the result is out of the representable range.
#[must_use]
pub fn first_flush_at(
    now: DateTime<Utc>,
    interval: Duration,
    grace: Duration,
) -> Option<DateTime<Utc>> {
    let grace = TimeDelta::try_milliseconds(i64::try_from(grace.as_millis()).ok()?)?;
    truncate(now, interval)
        .checked_add_signed(delta(interval)?)?
        .checked_add_signed(grace)
}

/// Start of the window that a flush firing at `fire` closes: the one before
/// the window `fire` falls in.
#[must_use]
pub fn window_to_flush(fire: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    truncate(fire, interval).checked_sub_signed(delta(interval)?)
}
