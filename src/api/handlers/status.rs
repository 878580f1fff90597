//! Handler for job status polling.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::json;

use crate::application::queue::JobStatus;
use crate::error::AppError;
use crate::state::AppState;

/// Reports the state of a retained job from either queue.
///
/// # Endpoint
///
/// `GET /api/status/{job_id}`
///
/// # Response
///
/// ```json
/// {
///   "jobId": 17,
///   "kind": "shorten",
///   "state": "completed",
///   "progress": 100,
///   "attempts": 1,
///   "result": "3f9a1c2",
///   "createdAt": "2025-01-01T00:00:00Z",
///   "finishedAt": "2025-01-01T00:00:00.050Z"
/// }
/// ```
///
/// # Errors
///
/// Returns 404 if the id is not numeric or the job is unknown or no longer
/// retained.
pub async fn status_handler(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobStatus<String>>, AppError> {
    let not_found = || AppError::not_found("Job not found", json!({ "jobId": job_id }));

    let id: u64 = job_id.parse().map_err(|_| not_found())?;

    state
        .shorten_queue
        .status(id)
        .or_else(|| state.redirect_queue.status(id))
        .map(Json)
        .ok_or_else(not_found)
}
