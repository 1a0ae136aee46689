//! Execution-engine abstraction and the ComfyUI implementation.
//!
//! An [`Engine`] runs one workflow, pushes every raw event it observes into
//! the supplied channel, and returns the final per-node output map.
//! The channel is bounded, so a slow consumer applies backpressure to the
//! event relay rather than growing a queue without limit.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::normalizer::RawEvent;
use crate::processor::{relay_messages, PromptOutcome};

/// An input file shipped with the job, referenced by name from the workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct InputFile {
    pub name: String,
    /// Base64 content, optionally as a `data:<mime>;base64,` URI.
    pub image: String,
}

impl InputFile {
    /// Decode the file content.
    pub fn decode(&self) -> Result<Vec<u8>, EngineError> {
        let encoded = match self.image.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => self.image.as_str(),
        };
        BASE64
            .decode(encoded.trim())
            .map_err(|e| EngineError::InvalidInput {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Errors from running a workflow on the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ComfyUIClientError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error("Invalid input file '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    /// The engine reported an execution failure; the message is the engine's own.
    #[error("{0}")]
    Execution(String),

    #[error("Engine connection closed before the prompt finished")]
    ConnectionClosed,

    #[error("No outputs recorded for prompt {0}")]
    MissingOutputs(String),

    #[error("Job cancelled")]
    Cancelled,
}

/// Runs workflows and streams their events.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run `workflow` to completion.
    ///
    /// Returns the engine's output map (node id -> output record).
    /// Dropping `events` is how the engine signals the stream is over.
    async fn run(
        &self,
        workflow: &serde_json::Value,
        files: &[InputFile],
        events: mpsc::Sender<RawEvent>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError>;
}

/// [`Engine`] backed by a ComfyUI server.
pub struct ComfyUIEngine {
    client: ComfyUIClient,
    api: ComfyUIApi,
}

impl ComfyUIEngine {
    pub fn new(client: ComfyUIClient, api: ComfyUIApi) -> Self {
        Self { client, api }
    }

    /// Build an engine for the server at `api_url` (e.g. `http://host:8188`).
    pub fn from_api_url(api_url: &str, http: reqwest::Client) -> Self {
        Self::new(
            ComfyUIClient::from_api_url(api_url),
            ComfyUIApi::with_client(http, api_url.to_string()),
        )
    }

    /// Best-effort removal of a prompt after the job was cancelled.
    async fn abandon(&self, prompt_id: &str) {
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove prompt from queue");
        }
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(prompt_id, error = %e, "Failed to interrupt execution");
        }
    }
}

#[async_trait]
impl Engine for ComfyUIEngine {
    async fn run(
        &self,
        workflow: &serde_json::Value,
        files: &[InputFile],
        events: mpsc::Sender<RawEvent>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        // Connect before submitting so no event for the prompt is missed.
        let conn = self.client.connect().await?;

        for file in files {
            let stored = self.api.upload_image(&file.name, file.decode()?).await?;
            tracing::debug!(name = %file.name, stored_as = %stored.name, "Uploaded input file");
        }

        let submitted = self.api.submit_workflow(workflow, &conn.client_id).await?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(
            prompt_id = %prompt_id,
            queue_position = submitted.number,
            "Workflow submitted to ComfyUI",
        );

        let mut ws_stream = conn.ws_stream;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.abandon(&prompt_id).await;
                return Err(EngineError::Cancelled);
            }
            outcome = relay_messages(&mut ws_stream, &prompt_id, &events) => outcome,
        };
        drop(events);

        match outcome {
            PromptOutcome::Finished => {}
            PromptOutcome::Failed(message) => return Err(EngineError::Execution(message)),
            PromptOutcome::Closed => return Err(EngineError::ConnectionClosed),
        }

        let mut history = self.api.get_history(&prompt_id).await?;
        match history
            .get_mut(&prompt_id)
            .and_then(|entry| entry.get_mut("outputs"))
        {
            Some(outputs) => Ok(outputs.take()),
            None => Err(EngineError::MissingOutputs(prompt_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_plain_base64() {
        let file = InputFile {
            name: "in.png".into(),
            image: "aGVsbG8=".into(),
        };
        assert_eq!(file.decode().unwrap(), b"hello");
    }

    #[test]
    fn decodes_data_uri() {
        let file = InputFile {
            name: "in.png".into(),
            image: "data:image/png;base64,aGVsbG8=".into(),
        };
        assert_eq!(file.decode().unwrap(), b"hello");
    }

    #[test]
    fn invalid_base64_names_the_file() {
        let file = InputFile {
            name: "broken.png".into(),
            image: "***".into(),
        };
        assert_matches!(file.decode(), Err(EngineError::InvalidInput { name, .. }) if name == "broken.png");
    }

    #[test]
    fn execution_error_displays_engine_message() {
        let err = EngineError::Execution("CUDA out of memory".into());
        assert_eq!(err.to_string(), "CUDA out of memory");
    }

    #[tokio::test]
    async fn unreachable_engine_fails_with_connection_error() {
        let engine = ComfyUIEngine::from_api_url("http://127.0.0.1:9", reqwest::Client::new());
        let (tx, _rx) = mpsc::channel(4);
        let result = engine
            .run(&serde_json::json!({}), &[], tx, CancellationToken::new())
            .await;
        assert_matches!(result, Err(EngineError::Connection(_)));
    }
}
