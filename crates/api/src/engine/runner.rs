//! Job orchestration: engine run, progress timeline, artifact upload.
//!
//! [`JobRunner::submit`] seeds the run in the status store and spawns the
//! job body on its own task. The body hands the engine a bounded event
//! channel and drains it concurrently: each raw event is normalized, fed to
//! the job's [`ProgressTracker`] and offered to the [`CallbackDispatcher`],
//! which drops unchanged progress. When the engine returns, artifacts are
//! collected, optionally uploaded, and exactly one terminal payload is
//! dispatched.

use std::sync::Arc;
use std::time::Duration;

use relay_cloud::UploadPipeline;
use relay_comfyui::engine::{Engine, EngineError};
use relay_comfyui::normalizer::normalize;
use relay_comfyui::outputs::ArtifactCollector;
use relay_comfyui::tracker::ProgressTracker;
use relay_core::error::CoreError;
use relay_core::job::{Artifact, CallbackPayload};
use relay_core::types::RunId;
use relay_events::dispatcher::DEFAULT_SINK_TIMEOUT;
use relay_events::{CallbackDispatcher, JobStore, StatusSink, WebhookSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::request::JobSpec;

/// Capacity of the engine-to-tracker event channel.
pub const EVENT_BUFFER: usize = 64;

/// Terminal error reported when the engine exceeds its time budget.
pub const ENGINE_TIMEOUT_MESSAGE: &str = "Engine execution timed out";

/// Terminal error reported for any upload failure; the cause is only logged.
pub const UPLOAD_FAILED_MESSAGE: &str = "Error uploading files";

/// How long a timed-out engine run may take to withdraw its prompt.
const ABANDON_GRACE: Duration = Duration::from_secs(10);

/// Why an engine run produced no outputs.
#[derive(Debug, thiserror::Error)]
enum RunFailure {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Engine execution timed out")]
    TimedOut,
}

/// Runs jobs end to end. Shared via `Arc<JobRunner>`.
pub struct JobRunner {
    engine: Arc<dyn Engine>,
    store: Arc<JobStore>,
    sinks: Vec<Arc<dyn StatusSink>>,
    collector: ArtifactCollector,
    uploader: UploadPipeline,
    http: reqwest::Client,
    engine_timeout: Option<Duration>,
    sink_timeout: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl JobRunner {
    pub fn new(
        engine: Arc<dyn Engine>,
        store: Arc<JobStore>,
        collector: ArtifactCollector,
        uploader: UploadPipeline,
        http: reqwest::Client,
    ) -> Self {
        Self {
            engine,
            store,
            sinks: Vec::new(),
            collector,
            uploader,
            http,
            engine_timeout: None,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Deployment-wide sinks every job reports to (host API, log).
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn StatusSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.engine_timeout = timeout;
        self
    }

    /// Bound on one sink delivery; a stalled callback endpoint cannot hold
    /// the job's event loop longer than this per status change.
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Number of jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Seed the run and start it in the background.
    ///
    /// Fails without starting anything if the run id is already tracked
    /// or the callback headers are unusable.
    pub async fn submit(self: &Arc<Self>, job: JobSpec) -> Result<RunId, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("Worker is shutting down".into()));
        }

        let dispatcher = self.dispatcher_for(&job)?;
        self.store
            .begin(CallbackPayload::processing(job.run_id.clone(), 0).with_metadata(job.metadata.clone()))
            .await?;

        let run_id = job.run_id.clone();
        tracing::info!(
            run_id = %run_id,
            nodes = job.workflow.len(),
            files = job.files.len(),
            upload = job.upload.is_some(),
            "Job accepted"
        );

        let runner = Arc::clone(self);
        self.tasks.spawn(async move {
            runner.run(job, dispatcher).await;
        });

        Ok(run_id)
    }

    /// Build the dispatcher for one job: shared sinks plus its webhook.
    pub fn dispatcher_for(&self, job: &JobSpec) -> Result<CallbackDispatcher, CoreError> {
        let mut dispatcher = CallbackDispatcher::new(Arc::clone(&self.store))
            .with_sinks(self.sinks.iter().cloned())
            .with_sink_timeout(self.sink_timeout);

        if let Some(url) = &job.callback_url {
            let webhook = WebhookSink::new(self.http.clone(), url.clone(), &job.callback_headers)
                .map_err(|e| CoreError::Validation(format!("callback_auth_header: {e}")))?;
            dispatcher = dispatcher.with_sink(Arc::new(webhook));
        }
        Ok(dispatcher)
    }

    /// Run one job to its terminal status.
    pub async fn run(&self, job: JobSpec, dispatcher: CallbackDispatcher) {
        let terminal = match self.execute(&job, &dispatcher).await {
            Ok(output) => {
                tracing::info!(run_id = %job.run_id, outputs = output.len(), "Job completed");
                CallbackPayload::completed(job.run_id.clone(), output)
            }
            Err(message) => {
                tracing::warn!(run_id = %job.run_id, error = %message, "Job failed");
                CallbackPayload::failed(job.run_id.clone(), message)
            }
        };
        dispatcher
            .dispatch(terminal.with_metadata(job.metadata.clone()))
            .await;
    }

    /// Cancel every in-flight job and wait up to `grace` for them to report.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(in_flight = self.tasks.len(), "Jobs still running after shutdown grace period");
        }
    }

    // ---- private helpers ----

    /// Engine run plus post-processing; `Err` carries the terminal message.
    async fn execute(
        &self,
        job: &JobSpec,
        dispatcher: &CallbackDispatcher,
    ) -> Result<Vec<Artifact>, String> {
        let outputs = self
            .run_engine(job, dispatcher)
            .await
            .map_err(|failure| failure.to_string())?;

        let artifacts = self.collector.collect(&outputs);

        let Some(target) = &job.upload else {
            return Ok(artifacts);
        };
        self.uploader.upload(artifacts, target).await.map_err(|e| {
            tracing::error!(run_id = %job.run_id, error = %e, "Error uploading files");
            UPLOAD_FAILED_MESSAGE.to_string()
        })
    }

    /// Drive the engine while draining its events into the tracker.
    async fn run_engine(
        &self,
        job: &JobSpec,
        dispatcher: &CallbackDispatcher,
    ) -> Result<serde_json::Value, RunFailure> {
        let mut tracker = ProgressTracker::new(&job.workflow);
        let workflow = serde_json::Value::Object(job.workflow.clone());
        let cancel = self.shutdown.child_token();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let engine_run = async {
            let run = self.engine.run(&workflow, &job.files, tx, cancel.clone());
            tokio::pin!(run);
            match self.engine_timeout {
                None => run.await.map_err(RunFailure::from),
                Some(limit) => tokio::select! {
                    result = &mut run => result.map_err(RunFailure::from),
                    () = tokio::time::sleep(limit) => {
                        tracing::warn!(run_id = %job.run_id, ?limit, "Engine run timed out");
                        cancel.cancel();
                        let _ = tokio::time::timeout(ABANDON_GRACE, run).await;
                        Err(RunFailure::TimedOut)
                    }
                },
            }
        };

        let drain = async {
            while let Some(raw) = rx.recv().await {
                let event = normalize(raw);
                let progress = tracker.update(&event);
                dispatcher
                    .dispatch(
                        CallbackPayload::processing(job.run_id.clone(), progress)
                            .with_metadata(job.metadata.clone()),
                    )
                    .await;
            }
        };

        let (result, ()) = tokio::join!(engine_run, drain);
        result
    }
}
