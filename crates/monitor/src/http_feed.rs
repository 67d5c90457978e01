//! HTTP implementation of [`TelemetryFeed`] using [`reqwest`].
//!
//! | Call                 | Request                                          |
//! |----------------------|--------------------------------------------------|
//! | `load_entities`      | `GET {base}/organizations/{org_id}/patients`     |
//! | `fetch_live_reading` | `GET {base}/patients/{id}/telemetry/latest`      |
//!
//! Both send `Authorization: Bearer <token>`. 401 and 403 map to
//! [`FeedError::Unauthorized`]. For live readings, 404 and 204 mean "no data
//! yet", and a JSON object with no recognised channel is treated the same.

use async_trait::async_trait;
use reqwest::StatusCode;
use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::record::EntityRecord;
use vitalwatch_core::types::DbId;

use crate::feed::{FeedError, LiveFetch, TelemetryFeed};

/// HTTP client for the telemetry backend.
pub struct HttpTelemetryFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTelemetryFeed {
    /// * `base_url` - Base HTTP URL without trailing slash, e.g. `http://host:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling, timeouts).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- private helpers ----

    /// Map auth and other non-2xx statuses to errors; pass 2xx through.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FeedError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FeedError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(FeedError::Transport(format!(
                "status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TelemetryFeed for HttpTelemetryFeed {
    async fn load_entities(
        &self,
        org_id: DbId,
        auth_token: &str,
    ) -> Result<Vec<EntityRecord>, FeedError> {
        let response = self
            .client
            .get(format!("{}/organizations/{}/patients", self.base_url, org_id))
            .bearer_auth(auth_token)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Vec<EntityRecord>>().await?)
    }

    async fn fetch_live_reading(
        &self,
        entity_id: DbId,
        auth_token: &str,
    ) -> Result<LiveFetch, FeedError> {
        let response = self
            .client
            .get(format!(
                "{}/patients/{}/telemetry/latest",
                self.base_url, entity_id
            ))
            .bearer_auth(auth_token)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT
        ) {
            return Ok(LiveFetch::NotFound);
        }

        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        let body: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| FeedError::Malformed(e.to_string()))?;
        let reading =
            PartialReading::from_json(&body).map_err(|e| FeedError::Malformed(e.to_string()))?;

        if reading.is_empty() {
            Ok(LiveFetch::NotFound)
        } else {
            Ok(LiveFetch::Reading(reading))
        }
    }
}
