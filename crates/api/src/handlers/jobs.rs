//! Handlers for the `/jobs` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use relay_core::error::CoreError;
use relay_core::job::JobStatus;
use relay_core::types::RunId;
use serde::Serialize;

use crate::engine::CreateJobRequest;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Acknowledgement returned when a job is accepted.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub run_id: RunId,
    pub status: JobStatus,
}

/// POST /jobs
///
/// Validate and start a job. Returns 202 with the run id; progress is
/// reported through the callback URL and `GET /jobs/{run_id}`.
pub async fn create_job(
    State(state): State<AppState>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let spec = request.into_spec()?;
    let run_id = state.runner.submit(spec).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: JobAccepted {
                run_id,
                status: JobStatus::Processing,
            },
        }),
    ))
}

/// GET /jobs/{run_id}
///
/// Latest status payload for a run, exactly as last delivered.
pub async fn get_job(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let payload = state.store.get(&run_id).await.ok_or(AppError::Core(CoreError::NotFound {
        entity: "Run",
        id: run_id,
    }))?;
    Ok(Json(DataResponse { data: payload }))
}
