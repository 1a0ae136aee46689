//! External delivery channels for job status payloads.
//!
//! Every channel implements [`StatusSink`]. The dispatcher treats sink
//! failures as non-fatal: they are logged and never reach the job.

pub mod host;
pub mod log;
pub mod webhook;

use async_trait::async_trait;
use relay_core::job::CallbackPayload;

/// Error type for status delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// A caller-supplied header name or value is not valid HTTP.
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
}

/// A destination for status-change notifications.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError>;
}
