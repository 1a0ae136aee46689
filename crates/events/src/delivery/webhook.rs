//! Caller-supplied callback URL delivery with exponential-backoff retry.
//!
//! [`WebhookSink`] POSTs the JSON payload to the job's `callback_url`,
//! adding the caller's extra headers. Terminal payloads are retried up to
//! three times (1 s, 2 s, 4 s); progress payloads are attempted once since
//! the next update supersedes them anyway.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::job::CallbackPayload;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{DeliveryError, StatusSink};

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

// ---------------------------------------------------------------------------
// WebhookSink
// ---------------------------------------------------------------------------

/// Delivers status payloads to one callback URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    retry_delays: Vec<Duration>,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("retry_delays", &self.retry_delays)
            .finish_non_exhaustive()
    }
}

impl WebhookSink {
    /// Create a sink for `url` sending `extra_headers` with every request.
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Self, DeliveryError> {
        let mut headers = HeaderMap::new();
        for (name, value) in extra_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DeliveryError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| DeliveryError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            client,
            url: url.into(),
            headers,
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        if !payload.status.is_terminal() {
            return self.try_send(payload).await;
        }

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        run_id = %payload.run_id,
                        error = %e,
                        "Callback delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(payload).await.inspect_err(|e| {
            tracing::error!(
                url = %self.url,
                run_id = %payload.run_id,
                error = %e,
                "Callback delivery failed after all retries"
            );
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
