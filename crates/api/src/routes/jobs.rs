//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at the root.
///
/// ```text
/// POST   /jobs            -> create_job
/// GET    /jobs/{run_id}   -> get_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/{run_id}", get(jobs::get_job))
}
