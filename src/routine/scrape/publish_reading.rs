use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::extract_reading::WaterReading;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("water temperature is {0} <= 0, please approve this manually")]
    NeedsApproval(f64),

    #[error("error while connecting to backend ({url}): {source}")]
    Request { url: Url, source: reqwest::Error },

    #[error("backend ({url}) answered with status {status}: {body}")]
    Rejected {
        url: Url,
        status: StatusCode,
        body: String,
    },
}

/// JSON body of the backend's temperature endpoint.
#[derive(Debug, Serialize, PartialEq)]
pub struct ReadingPayload {
    pub temperature: f64,
    pub time: String,
}

impl From<&WaterReading> for ReadingPayload {
    fn from(reading: &WaterReading) -> Self {
        ReadingPayload {
            temperature: reading.temperature,
            time: reading.wire_time(),
        }
    }
}

/// Where readings end up.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn publish(&self, reading: &WaterReading) -> Result<(), PublishError>;
}

/// Readings at or below freezing are held back for a human to confirm.
pub fn check_plausible(reading: &WaterReading) -> Result<(), PublishError> {
    if reading.temperature <= 0.0 {
        Err(PublishError::NeedsApproval(reading.temperature))
    } else {
        Ok(())
    }
}

pub struct BackendClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl BackendClient {
    pub fn new(client: reqwest::Client, endpoint: Url, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl ReadingSink for BackendClient {
    #[instrument("publish_reading", skip(self, reading), fields(url = %self.endpoint))]
    async fn publish(&self, reading: &WaterReading) -> Result<(), PublishError> {
        check_plausible(reading)?;

        let payload = ReadingPayload::from(reading);
        debug!("Send {payload:?} to {}", self.endpoint);

        let response = self
            .client
            .put(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|source| PublishError::Request {
                url: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read backend response body: {e}");
                format!("<unreadable body: {e}>")
            }
        };
        debug!("success: {} | content: {}", status.is_success(), body);

        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected {
                url: self.endpoint.clone(),
                status,
                body,
            })
        }
    }
}
