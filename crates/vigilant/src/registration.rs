// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service instance registration with the backend.
//!
//! Every process registers itself under the configured service name and gets
//! an instance number and ID back. Metrics are attributed to that instance, so
//! the collector does not flush anything until registration has completed.
//!
//! ```text
//!   Unregistered ──register──> Registered ──stop/DELETE──> Deregistered
//!                               │      ^
//!                               └──────┘ heartbeat (may reassign)
//! ```
//!
//! A failed heartbeat never moves the handler back to the unregistered state.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_REGISTRATION_INTERVAL, HEARTBEAT_PATH, REGISTRATION_BACKOFF_STEP,
    REGISTRATION_MAX_ATTEMPTS, REGISTRATION_PATH,
};
use crate::errors::RegistrationError;
use crate::intake::IntakeClient;

/// Identity this process reports its metrics under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_number: i64,
    pub instance_id: Uuid,
}

/// Rendered as `<service>-<number>`, the value of the `service` metric tag.
impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.service_name, self.instance_number)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistrationConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REGISTRATION_INTERVAL,
            max_attempts: REGISTRATION_MAX_ATTEMPTS,
            backoff_step: REGISTRATION_BACKOFF_STEP,
        }
    }
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    token: &'a str,
    service_name: &'a str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    service_instance_number: i64,
    service_instance_id: Uuid,
}

/// Body of both the heartbeat and the deregistration request.
#[derive(Serialize)]
struct InstanceRequest<'a> {
    token: &'a str,
    service_name: &'a str,
    service_instance_number: i64,
    service_instance_id: Uuid,
}

#[derive(Deserialize)]
struct HeartbeatResponse {
    reassigned: bool,
    #[serde(default)]
    new_instance_number: Option<i64>,
    #[serde(default)]
    new_instance_id: Option<Uuid>,
}

pub struct RegistrationHandler {
    intake: IntakeClient,
    service_name: String,
    config: RegistrationConfig,
    state: RwLock<Option<ServiceInstance>>,
    registered: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RegistrationHandler {
    #[must_use]
    pub fn new(
        intake: IntakeClient,
        service_name: &str,
        config: RegistrationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (registered, _) = watch::channel(false);
        Self {
            intake,
            service_name: service_name.to_string(),
            config,
            state: RwLock::new(None),
            registered,
            cancel,
            task: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        info!(
            "REGISTRATION | Starting registration for service {}",
            self.service_name
        );
        let handler = Arc::clone(self);
        *task = Some(tokio::spawn(async move { handler.run().await }));
    }

    /// Stops the loop, then deregisters best-effort. The identity is cleared
    /// whether or not the backend acknowledged the deregistration.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("REGISTRATION | Registration task failed: {}", e);
            }
        }

        let current = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(instance) = current {
            if let Err(e) = self.deregister(&instance).await {
                debug!("REGISTRATION | Failed to deregister {}: {}", instance, e);
            } else {
                info!("REGISTRATION | Deregistered {}", instance);
            }
        }
    }

    /// Current identity, or `NotRegistered` before the first registration and
    /// after deregistration.
    pub fn service_instance(&self) -> Result<ServiceInstance, RegistrationError> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RegistrationError::NotRegistered)
    }

    /// Resolves once the first registration succeeded, or fails with
    /// `Cancelled` when `cancel` fires first.
    pub async fn wait_for_registration(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ServiceInstance, RegistrationError> {
        let mut rx = self.registered.subscribe();
        let registered = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            res = rx.wait_for(|registered| *registered) => res.is_ok(),
        };
        if !registered {
            return Err(RegistrationError::Cancelled);
        }
        self.service_instance()
    }

    async fn run(&self) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        debug!("REGISTRATION | Registration loop stopped");
    }

    async fn tick(&self) {
        if self.service_instance().is_ok() {
            if let Err(e) = self.heartbeat().await {
                warn!("REGISTRATION | Heartbeat failed: {}", e);
            }
        } else {
            self.register_with_retry().await;
        }
    }

    async fn register_with_retry(&self) {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.register().await {
                Ok(instance) => {
                    info!("REGISTRATION | Registered as {}", instance);
                    return;
                }
                Err(e) => {
                    debug!(
                        "REGISTRATION | Attempt {}/{} failed: {}",
                        attempt, max_attempts, e
                    );
                }
            }
            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return,
                    () = tokio::time::sleep(self.config.backoff_step * attempt) => {}
                }
            }
        }
        warn!(
            "REGISTRATION | Giving up registering {} after {} attempts, retrying next tick",
            self.service_name, max_attempts
        );
    }

    /// Sends one registration request and stores the identity it returns.
    pub(crate) async fn register(&self) -> Result<ServiceInstance, RegistrationError> {
        let request = RegistrationRequest {
            token: self.intake.token(),
            service_name: &self.service_name,
        };
        let response: RegistrationResponse = self
            .intake
            .request(Method::POST, REGISTRATION_PATH, &request)
            .await?
            .json()
            .await
            .map_err(|e| RegistrationError::InvalidResponse(e.to_string()))?;

        let instance = ServiceInstance {
            service_name: self.service_name.clone(),
            instance_number: response.service_instance_number,
            instance_id: response.service_instance_id,
        };
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = state.as_ref() {
                return Ok(existing.clone());
            }
            *state = Some(instance.clone());
        }
        self.registered.send_replace(true);
        Ok(instance)
    }

    /// Sends one heartbeat. Returns `true` when the backend reassigned the
    /// instance, in which case the new identity replaces the old one.
    pub(crate) async fn heartbeat(&self) -> Result<bool, RegistrationError> {
        let current = self.service_instance()?;
        let request = InstanceRequest {
            token: self.intake.token(),
            service_name: &current.service_name,
            service_instance_number: current.instance_number,
            service_instance_id: current.instance_id,
        };
        let response: HeartbeatResponse = self
            .intake
            .request(Method::POST, HEARTBEAT_PATH, &request)
            .await?
            .json()
            .await
            .map_err(|e| RegistrationError::InvalidResponse(e.to_string()))?;

        if !response.reassigned {
            return Ok(false);
        }
        let (Some(number), Some(id)) = (response.new_instance_number, response.new_instance_id)
        else {
            return Err(RegistrationError::InvalidResponse(
                "reassignment without a new identity".to_string(),
            ));
        };

        let reassigned = ServiceInstance {
            service_name: current.service_name.clone(),
            instance_number: number,
            instance_id: id,
        };
        info!("REGISTRATION | Reassigned from {} to {}", current, reassigned);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(reassigned);
        Ok(true)
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<(), RegistrationError> {
        let request = InstanceRequest {
            token: self.intake.token(),
            service_name: &instance.service_name,
            service_instance_number: instance.instance_number,
            service_instance_id: instance.instance_id,
        };
        self.intake
            .request(Method::DELETE, REGISTRATION_PATH, &request)
            .await?;
        Ok(())
    }
}
