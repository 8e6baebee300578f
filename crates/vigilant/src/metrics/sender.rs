// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::SNAPSHOT_QUEUE_CAPACITY;
use crate::intake::IntakeClient;
use crate::messages::MetricsSnapshot;

/// Ships metric snapshots, one request per snapshot, off the flush path.
pub struct MetricSender {
    tx: mpsc::Sender<MetricsSnapshot>,
    rx: Mutex<Option<mpsc::Receiver<MetricsSnapshot>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    intake: IntakeClient,
    cancel: CancellationToken,
}

impl MetricSender {
    #[must_use]
    pub fn new(intake: IntakeClient, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(SNAPSHOT_QUEUE_CAPACITY);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
            intake,
            cancel,
        }
    }

    pub fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let intake = self.intake.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move { run(rx, intake, cancel).await });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Queues a snapshot for shipping. Dropped with a warning when the queue is full.
    pub fn send(&self, snapshot: MetricsSnapshot) {
        match self.tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(snapshot)) => {
                warn!(
                    "METRICS | Snapshot queue full, dropping {} series",
                    snapshot.len()
                );
            }
            Err(TrySendError::Closed(snapshot)) => {
                debug!(
                    "METRICS | Sender stopped, dropping {} series",
                    snapshot.len()
                );
            }
        }
    }

    /// Stops the consumer after every queued snapshot has been shipped.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("METRICS | Sender task failed: {}", e);
            }
            return;
        }
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rx) = rx {
            drain(rx, &self.intake).await;
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<MetricsSnapshot>,
    intake: IntakeClient,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                ship(&intake, &snapshot).await;
            }
        }
    }
    drain(rx, &intake).await;
}

async fn drain(mut rx: mpsc::Receiver<MetricsSnapshot>, intake: &IntakeClient) {
    rx.close();
    while let Ok(snapshot) = rx.try_recv() {
        ship(intake, &snapshot).await;
    }
}

async fn ship(intake: &IntakeClient, snapshot: &MetricsSnapshot) {
    if let Err(e) = intake.ship_metrics(snapshot).await {
        error!(
            "METRICS | Failed to ship {} series: {}",
            snapshot.len(),
            e
        );
    }
}
