//! Development stand-in for the host progress sink.

use async_trait::async_trait;
use relay_core::job::CallbackPayload;

use super::{DeliveryError, StatusSink};

/// Logs status changes instead of pushing them anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        tracing::info!(
            run_id = %payload.run_id,
            status = payload.status.as_str(),
            progress = ?payload.progress(),
            "Status update"
        );
        Ok(())
    }
}
