//! Progress push to the host orchestration runtime.
//!
//! When the worker runs under a managed serverless runtime, every status
//! change is also reported to the runtime's job progress endpoint so the
//! host's own job view stays current.

use async_trait::async_trait;
use relay_core::job::{CallbackPayload, JobStatus};

use super::{DeliveryError, StatusSink};

/// Placeholder in the endpoint template replaced by the run id.
const RUN_ID_PLACEHOLDER: &str = "$ID";

/// Host-runtime status name for a job status.
fn host_status(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Processing => "IN_PROGRESS",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
    }
}

/// Pushes payloads to `{url_template}` with `$ID` replaced by the run id.
pub struct HostProgressSink {
    client: reqwest::Client,
    url_template: String,
    api_key: Option<String>,
}

impl HostProgressSink {
    pub fn new(client: reqwest::Client, url_template: String, api_key: Option<String>) -> Self {
        Self {
            client,
            url_template,
            api_key,
        }
    }

    fn url_for(&self, run_id: &str) -> String {
        self.url_template.replace(RUN_ID_PLACEHOLDER, run_id)
    }
}

#[async_trait]
impl StatusSink for HostProgressSink {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "status": host_status(payload.status),
            "output": payload,
        });

        let mut request = self.client.post(self.url_for(&payload.run_id)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
