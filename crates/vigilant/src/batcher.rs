// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Queue-and-flush delivery for one payload kind.
//!
//! Submitting never blocks: items go into a bounded channel and are dropped
//! when it is full. A background task collects them into a buffer that is
//! shipped when it reaches `max_batch_size` or when the flush ticker fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::constants::{DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY};
use crate::intake::IntakeClient;
use crate::messages::BatchItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

pub struct Batcher<T: BatchItem> {
    tx: mpsc::Sender<T>,
    // Held until the loop is started, or until `stop` drains it directly.
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    intake: IntakeClient,
    config: BatchConfig,
    cancel: CancellationToken,
    dropped: AtomicU64,
}

impl<T: BatchItem> Batcher<T> {
    #[must_use]
    pub fn new(intake: IntakeClient, config: BatchConfig, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
            intake,
            config,
            cancel,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues `item` without waiting. The item is dropped when the queue is
    /// full or the batcher has stopped.
    pub fn submit(&self, item: T) {
        if self.tx.try_send(item).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of items dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawns the flush loop. Calling it again has no effect.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let intake = self.intake.clone();
        let config = self.config;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            run(rx, intake, config, cancel).await;
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stops the loop and ships everything still queued before returning.
    /// Later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("{} | Batcher task failed: {}", T::KIND.log_prefix(), e);
            }
            return;
        }

        // never started
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rx) = rx {
            drain(rx, Vec::new(), &self.intake, self.config.max_batch_size).await;
        }
    }
}

async fn run<T: BatchItem>(
    mut rx: mpsc::Receiver<T>,
    intake: IntakeClient,
    config: BatchConfig,
    cancel: CancellationToken,
) {
    let max_batch_size = config.max_batch_size.max(1);
    let mut buffer: Vec<T> = Vec::with_capacity(max_batch_size);
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => {
                let Some(item) = item else { break };
                buffer.push(item);
                if buffer.len() >= max_batch_size {
                    flush(&intake, &mut buffer).await;
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&intake, &mut buffer).await;
                }
            }
        }
    }

    drain(rx, buffer, &intake, max_batch_size).await;
}

async fn drain<T: BatchItem>(
    mut rx: mpsc::Receiver<T>,
    mut buffer: Vec<T>,
    intake: &IntakeClient,
    max_batch_size: usize,
) {
    rx.close();
    while let Ok(item) = rx.try_recv() {
        buffer.push(item);
    }
    debug!(
        "{} | Draining {} item(s) on shutdown",
        T::KIND.log_prefix(),
        buffer.len()
    );

    let max_batch_size = max_batch_size.max(1);
    while !buffer.is_empty() {
        let take = buffer.len().min(max_batch_size);
        let mut chunk: Vec<T> = buffer.drain(..take).collect();
        flush(intake, &mut chunk).await;
    }
}

async fn flush<T: BatchItem>(intake: &IntakeClient, buffer: &mut Vec<T>) {
    let batch = std::mem::take(buffer);
    if let Err(e) = intake.ship_batch(&batch).await {
        error!(
            "{} | Failed to ship batch of {} item(s): {}",
            T::KIND.log_prefix(),
            batch.len(),
            e
        );
    }
}
