use std::sync::Arc;

use relay_events::JobStore;

use crate::config::WorkerConfig;
use crate::engine::JobRunner;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WorkerConfig>,
    /// Last known status per run, read by `GET /jobs/{run_id}`.
    pub store: Arc<JobStore>,
    pub runner: Arc<JobRunner>,
}
