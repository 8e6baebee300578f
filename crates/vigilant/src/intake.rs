// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authenticated JSON requests against the ingestion backend.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::constants::MESSAGE_PATH;
use crate::errors::ShippingError;
use crate::messages::{BatchItem, MessageBatch, MetricsBatch, MetricsSnapshot};

/// Cheap to clone; every clone shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct IntakeClient {
    client: reqwest::Client,
    base_url: Arc<str>,
    token: Arc<str>,
}

impl IntakeClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: Arc::from(token),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    fn headers(&self) -> Result<HeaderMap, ShippingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ShippingError::Payload(format!("invalid token header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Sends `body` as JSON to `path`. Any non-2xx answer is an error.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, ShippingError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| ShippingError::Payload(e.to_string()))?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .request(method, &url)
            .headers(self.headers()?)
            .body(payload)
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::Destination(Some(status), body));
        }
        Ok(response)
    }

    /// Ships one batch of logs, errors or alerts.
    pub async fn ship_batch<T: BatchItem>(&self, items: &[T]) -> Result<(), ShippingError> {
        let envelope = MessageBatch::new(&self.token, items);
        self.request(Method::POST, MESSAGE_PATH, &envelope).await?;
        debug!(
            "{} | Shipped {} {} item(s)",
            T::KIND.log_prefix(),
            items.len(),
            T::KIND
        );
        Ok(())
    }

    pub async fn ship_metrics(&self, snapshot: &MetricsSnapshot) -> Result<(), ShippingError> {
        let envelope = MetricsBatch::new(&self.token, snapshot);
        self.request(Method::POST, MESSAGE_PATH, &envelope).await?;
        debug!("METRICS | Shipped {} series", snapshot.len());
        Ok(())
    }
}
