// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Windowed metric collection.
//!
//! Application code records events through a [`MetricsHandle`], which only
//! does a non-blocking channel send. A consumer task folds the events into the
//! [`Aggregator`]; a ticker task flushes it once per window, aligned to epoch
//! boundaries, after the service instance has registered.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::messages::MetricsSnapshot;
use crate::metrics::aggregator::Aggregator;
use crate::metrics::event::{MetricEvent, MetricKind};
use crate::metrics::sender::MetricSender;
use crate::metrics::window::{first_flush_at, truncate, window_to_flush, FLUSH_GRACE};
use crate::registration::RegistrationHandler;

/// Cloneable submission side of the collector.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    counters: mpsc::Sender<MetricEvent>,
    gauges: mpsc::Sender<MetricEvent>,
    histograms: mpsc::Sender<MetricEvent>,
    dropped: Arc<AtomicU64>,
}

impl MetricsHandle {
    pub fn record_counter(&self, event: MetricEvent) {
        self.try_send(&self.counters, event);
    }

    pub fn record_gauge(&self, event: MetricEvent) {
        self.try_send(&self.gauges, event);
    }

    pub fn record_histogram(&self, event: MetricEvent) {
        self.try_send(&self.histograms, event);
    }

    /// Routes `event` to the channel of its kind.
    pub fn record(&self, event: MetricEvent) {
        match event.kind {
            MetricKind::Counter => self.record_counter(event),
            MetricKind::Gauge => self.record_gauge(event),
            MetricKind::Histogram => self.record_histogram(event),
        }
    }

    /// Events dropped because their channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn try_send(&self, tx: &mpsc::Sender<MetricEvent>, event: MetricEvent) {
        if tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct Receivers {
    counters: mpsc::Receiver<MetricEvent>,
    gauges: mpsc::Receiver<MetricEvent>,
    histograms: mpsc::Receiver<MetricEvent>,
}

impl Receivers {
    fn drain_into(mut self, core: &CollectorCore) {
        for rx in [&mut self.counters, &mut self.gauges, &mut self.histograms] {
            rx.close();
            while let Ok(event) = rx.try_recv() {
                core.apply(&event);
            }
        }
    }
}

struct CollectorCore {
    interval: Duration,
    aggregator: RwLock<Aggregator>,
    /// Epoch millis before which recorded events are ignored, set when the
    /// pre-registration state is discarded.
    accept_from: AtomicI64,
    registration: Arc<RegistrationHandler>,
    sender: MetricSender,
}

impl CollectorCore {
    fn apply(&self, event: &MetricEvent) {
        if event.timestamp.timestamp_millis() < self.accept_from.load(Ordering::Acquire) {
            return;
        }
        self.aggregator
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event);
    }

    /// Takes the whole aggregation state. Without a registered instance the
    /// state is discarded and `None` is returned.
    fn take_snapshot(&self, window_start: DateTime<Utc>) -> Option<MetricsSnapshot> {
        let instance = self.registration.service_instance();
        let mut aggregator = self.aggregator.write().unwrap_or_else(PoisonError::into_inner);
        match instance {
            Ok(instance) => aggregator.snapshot(window_start, &instance.to_string()),
            Err(e) => {
                if !aggregator.is_empty() {
                    debug!(
                        "METRICS | Dropping window {} with {} series: {}",
                        window_start,
                        aggregator.series_count(),
                        e
                    );
                }
                aggregator.clear();
                None
            }
        }
    }

    fn flush_window(&self, window_start: Option<DateTime<Utc>>) {
        let Some(window_start) = window_start else {
            return;
        };
        if let Some(snapshot) = self.take_snapshot(window_start) {
            debug!(
                "METRICS | Flushing window {} with {} series",
                window_start,
                snapshot.len()
            );
            self.sender.send(snapshot);
        }
    }

    fn discard_pending(&self) {
        let mut aggregator = self.aggregator.write().unwrap_or_else(PoisonError::into_inner);
        self.accept_from
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        if !aggregator.is_empty() {
            debug!(
                "METRICS | Discarding {} series recorded before registration",
                aggregator.series_count()
            );
        }
        aggregator.clear();
    }
}

pub struct MetricCollector {
    core: Arc<CollectorCore>,
    handle: MetricsHandle,
    receivers: Mutex<Option<Receivers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl MetricCollector {
    /// `sender` and `registration` are owned by the collector and stopped by
    /// [`MetricCollector::stop`] after the final flush.
    #[must_use]
    pub fn new(
        interval: Duration,
        queue_capacity: usize,
        sender: MetricSender,
        registration: Arc<RegistrationHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = queue_capacity.max(1);
        let (counters_tx, counters) = mpsc::channel(capacity);
        let (gauges_tx, gauges) = mpsc::channel(capacity);
        let (histograms_tx, histograms) = mpsc::channel(capacity);

        Self {
            core: Arc::new(CollectorCore {
                interval,
                aggregator: RwLock::new(Aggregator::new()),
                accept_from: AtomicI64::new(i64::MIN),
                registration,
                sender,
            }),
            handle: MetricsHandle {
                counters: counters_tx,
                gauges: gauges_tx,
                histograms: histograms_tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receivers: Mutex::new(Some(Receivers {
                counters,
                gauges,
                histograms,
            })),
            tasks: Mutex::new(Vec::new()),
            cancel,
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn handle(&self) -> MetricsHandle {
        self.handle.clone()
    }

    /// Starts registration, the sender and both collector tasks.
    pub fn start(&self) {
        let Some(receivers) = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        self.core.registration.start();
        self.core.sender.start();

        let consumer = tokio::spawn(run_consumer(
            Arc::clone(&self.core),
            receivers,
            self.cancel.clone(),
        ));
        let ticker = tokio::spawn(run_ticker(Arc::clone(&self.core), self.cancel.clone()));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([consumer, ticker]);
        info!(
            "METRICS | Collector started with a {}s window",
            self.core.interval.as_secs_f64()
        );
    }

    /// Stops both tasks, flushes what is left as the current window, then
    /// stops the sender and deregisters.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!("METRICS | Collector task failed: {}", e);
            }
        }
        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receivers) = receivers {
            receivers.drain_into(&self.core);
        }

        self.core
            .flush_window(Some(truncate(Utc::now(), self.core.interval)));
        self.core.sender.stop().await;
        self.core.registration.stop().await;
        info!("METRICS | Collector stopped");
    }
}

async fn run_consumer(core: Arc<CollectorCore>, mut receivers: Receivers, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(event) = receivers.counters.recv() => core.apply(&event),
            Some(event) = receivers.gauges.recv() => core.apply(&event),
            Some(event) = receivers.histograms.recv() => core.apply(&event),
            else => break,
        }
    }
    receivers.drain_into(&core);
}

/// Flushes one window per tick once the instance is registered. Whatever was
/// aggregated before registration is discarded, including events still queued
/// in the channels at that moment.
async fn run_ticker(core: Arc<CollectorCore>, cancel: CancellationToken) {
    if core.registration.wait_for_registration(&cancel).await.is_err() {
        return;
    }
    core.discard_pending();

    let period = core.interval;
    let now = Utc::now();
    let Some(first) = first_flush_at(now, period, FLUSH_GRACE) else {
        error!(
            "METRICS | Window of {}s is out of range, periodic flushing disabled",
            period.as_secs()
        );
        return;
    };
    let delay = (first - now).to_std().unwrap_or_default();
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(delay) => {}
    }
    core.flush_window(window_to_flush(first, period));

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => core.flush_window(window_to_flush(Utc::now(), period)),
        }
    }
}
