//! Status-change deduplication and fan-out.
//!
//! Every payload a job produces goes through [`CallbackDispatcher::dispatch`].
//! The [`JobStore`] is always updated first (it backs status polling); the
//! external sinks only see payloads the store classifies as a real change.
//! Sink failures and sinks that exceed their delivery timeout are logged
//! and swallowed.

use std::sync::Arc;
use std::time::Duration;

use relay_core::job::CallbackPayload;

use crate::delivery::StatusSink;
use crate::store::{JobStore, RecordOutcome};

/// Upper bound on one sink's delivery of one payload, retries included.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-job dispatcher: the shared store plus the sinks configured for the job.
#[derive(Clone)]
pub struct CallbackDispatcher {
    store: Arc<JobStore>,
    sinks: Vec<Arc<dyn StatusSink>>,
    sink_timeout: Duration,
}

impl CallbackDispatcher {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            sinks: Vec::new(),
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Add an external sink.
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn StatusSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Record `payload` and deliver it if it is a status change.
    ///
    /// Sinks are driven concurrently and each one is cut off after the sink
    /// timeout, so a slow or failing sink neither blocks nor affects the
    /// others. The call returns once every sink finished or timed out.
    pub async fn dispatch(&self, payload: CallbackPayload) -> RecordOutcome {
        let outcome = self.store.record(payload.clone()).await;
        match outcome {
            RecordOutcome::Changed => {}
            RecordOutcome::Unchanged => {
                tracing::trace!(run_id = %payload.run_id, "Progress unchanged, delivery suppressed");
                return outcome;
            }
            RecordOutcome::Rejected => {
                tracing::warn!(
                    run_id = %payload.run_id,
                    status = payload.status.as_str(),
                    "Run already finished, dropping status update"
                );
                return outcome;
            }
        }

        let deliveries = self.sinks.iter().map(|sink| {
            let payload = &payload;
            async move {
                match tokio::time::timeout(self.sink_timeout, sink.deliver(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        run_id = %payload.run_id,
                        sink = sink.name(),
                        error = %e,
                        "Status delivery failed"
                    ),
                    Err(_) => tracing::warn!(
                        run_id = %payload.run_id,
                        sink = sink.name(),
                        timeout = ?self.sink_timeout,
                        "Status delivery timed out"
                    ),
                }
            }
        });
        futures::future::join_all(deliveries).await;

        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryError;
    use async_trait::async_trait;
    use relay_core::clock::SystemClock;
    use relay_core::job::JobStatus;
    use std::sync::Mutex;

    /// Records every delivered payload.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<CallbackPayload>>,
    }

    impl RecordingSink {
        fn delivered(&self) -> Vec<CallbackPayload> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _payload: &CallbackPayload) -> Result<(), DeliveryError> {
            Err(DeliveryError::HttpStatus(500))
        }
    }

    /// Never finishes a delivery.
    struct StalledSink;

    #[async_trait]
    impl StatusSink for StalledSink {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn deliver(&self, _payload: &CallbackPayload) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    async fn setup() -> (CallbackDispatcher, Arc<RecordingSink>) {
        let store = Arc::new(JobStore::new(
            chrono::Duration::hours(1),
            100,
            Arc::new(SystemClock),
        ));
        store.begin(CallbackPayload::processing("r1", 0)).await.unwrap();
        let recording = Arc::new(RecordingSink::default());
        let dispatcher = CallbackDispatcher::new(store).with_sink(recording.clone());
        (dispatcher, recording)
    }

    #[tokio::test]
    async fn suppresses_repeated_progress() {
        let (dispatcher, sink) = setup().await;

        for progress in [10, 10, 10, 25, 25, 40] {
            dispatcher.dispatch(CallbackPayload::processing("r1", progress)).await;
        }

        let delivered: Vec<_> = sink.delivered().iter().map(|p| p.progress()).collect();
        assert_eq!(delivered, vec![Some(10), Some(25), Some(40)]);
    }

    #[tokio::test]
    async fn seeded_zero_progress_is_not_redelivered() {
        let (dispatcher, sink) = setup().await;
        let outcome = dispatcher.dispatch(CallbackPayload::processing("r1", 0)).await;
        assert_eq!(outcome, RecordOutcome::Unchanged);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn terminal_transition_always_delivered() {
        let (dispatcher, sink) = setup().await;
        dispatcher.dispatch(CallbackPayload::processing("r1", 100)).await;
        dispatcher.dispatch(CallbackPayload::completed("r1", vec![])).await;

        let statuses: Vec<_> = sink.delivered().iter().map(|p| p.status).collect();
        assert_eq!(statuses, vec![JobStatus::Processing, JobStatus::Completed]);
    }

    #[tokio::test]
    async fn nothing_delivered_after_terminal() {
        let (dispatcher, sink) = setup().await;
        dispatcher.dispatch(CallbackPayload::failed("r1", "boom")).await;
        let outcome = dispatcher.dispatch(CallbackPayload::completed("r1", vec![])).await;

        assert_eq!(outcome, RecordOutcome::Rejected);
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(
            dispatcher.store().get("r1").await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn failing_sink_does_not_affect_others() {
        let (dispatcher, sink) = setup().await;
        let dispatcher = dispatcher.with_sink(Arc::new(FailingSink));

        let outcome = dispatcher.dispatch(CallbackPayload::processing("r1", 60)).await;
        assert_eq!(outcome, RecordOutcome::Changed);
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(dispatcher.store().get("r1").await.unwrap().progress(), Some(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_is_cut_off_after_timeout() {
        let (dispatcher, sink) = setup().await;
        let dispatcher = dispatcher
            .with_sink(Arc::new(StalledSink))
            .with_sink_timeout(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        dispatcher.dispatch(CallbackPayload::processing("r1", 30)).await;
        dispatcher.dispatch(CallbackPayload::completed("r1", vec![])).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(sink.delivered().len(), 2);
        assert_eq!(
            dispatcher.store().get("r1").await.unwrap().status,
            JobStatus::Completed
        );
    }
}
