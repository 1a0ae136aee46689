#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use relay_cloud::{
    CredentialResolver, Credentials, ObjectStore, StorageError, StoreProvider, UploadPipeline,
};
use relay_comfyui::engine::{Engine, EngineError, InputFile};
use relay_comfyui::normalizer::RawEvent;
use relay_comfyui::outputs::{ArtifactCollector, PathMode};
use relay_core::clock::SystemClock;
use relay_core::upload::CloudType;
use relay_events::JobStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use relay_api::config::WorkerConfig;
use relay_api::engine::JobRunner;
use relay_api::router::build_app_router;
use relay_api::state::AppState;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// How a [`ScriptedEngine`] run ends.
#[derive(Clone)]
pub enum Outcome {
    Outputs(serde_json::Value),
    Fail(String),
    /// Run until cancelled.
    Hang,
}

/// Engine that replays raw frames, then ends as scripted.
#[derive(Clone)]
pub struct ScriptedEngine {
    pub frames: Vec<String>,
    pub outcome: Outcome,
}

impl ScriptedEngine {
    pub fn new(frames: &[&str], outcome: Outcome) -> Self {
        Self {
            frames: frames.iter().map(|f| f.to_string()).collect(),
            outcome,
        }
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(
        &self,
        _workflow: &serde_json::Value,
        _files: &[InputFile],
        events: mpsc::Sender<RawEvent>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, EngineError> {
        for frame in &self.frames {
            let _ = events.send(RawEvent::Text(frame.clone())).await;
        }
        match &self.outcome {
            Outcome::Outputs(outputs) => Ok(outputs.clone()),
            Outcome::Fail(message) => Err(EngineError::Execution(message.clone())),
            Outcome::Hang => {
                cancel.cancelled().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}

/// Object-store provider that records uploaded keys, or refuses to open.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    pub keys: Arc<Mutex<Vec<String>>>,
    pub unavailable: bool,
}

struct MemoryStore {
    bucket: String,
    keys: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StoreProvider for MemoryProvider {
    async fn open(
        &self,
        _cloud_type: CloudType,
        bucket: &str,
        _credentials: Credentials,
    ) -> Result<Box<dyn ObjectStore>, StorageError> {
        if self.unavailable {
            return Err(StorageError::Backend("bucket unreachable".into()));
        }
        Ok(Box::new(MemoryStore {
            bucket: bucket.to_string(),
            keys: Arc::clone(&self.keys),
        }))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put_file(&self, _local: &Path, key: &str) -> Result<Option<String>, StorageError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(Some(format!("https://store.test/{}/{key}", self.bucket)))
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Configuration with every variable unset.
pub fn test_config() -> WorkerConfig {
    WorkerConfig::from_lookup(|_| None).unwrap()
}

/// Application state around a fake engine and object store.
pub fn test_state(engine: ScriptedEngine, provider: MemoryProvider, path_mode: PathMode) -> AppState {
    let config = Arc::new(test_config());
    let store = Arc::new(JobStore::new(
        chrono::Duration::hours(1),
        1_000,
        Arc::new(SystemClock),
    ));
    let uploader = UploadPipeline::new(CredentialResolver::default(), Arc::new(provider));
    let runner = JobRunner::new(
        Arc::new(engine),
        Arc::clone(&store),
        ArtifactCollector::new(path_mode),
        uploader,
        reqwest::Client::new(),
    );
    AppState {
        config,
        store,
        runner: Arc::new(runner),
    }
}

/// Build the full application router, exactly as the binary does.
pub fn build_test_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: String) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /jobs/{run_id}` until the run leaves `processing`.
pub async fn wait_for_terminal(app: &Router, run_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let response = get(app.clone(), &format!("/jobs/{run_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        if json["data"]["status"] != "processing" {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal status");
}
