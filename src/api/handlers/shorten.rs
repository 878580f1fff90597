//! Handler for the shortening endpoint.

use axum::{Json, extract::State};
use tracing::debug;
use validator::Validate;

use crate::api::dto::shorten::{ShortenRequest, ShortenResponse};
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::url_normalizer::canonicalize_url;

/// Shortens a URL through the shorten queue.
///
/// # Endpoint
///
/// `POST /api/shorten`
///
/// # Request Body
///
/// ```json
/// { "url": "example.com/some/long/path" }
/// ```
///
/// # Response
///
/// ```json
/// { "shortUrl": "https://s.example.com/3f9a1c2" }
/// ```
///
/// The URL is canonicalized before it is queued so that equivalent
/// submissions join the same job.
///
/// # Errors
///
/// - 400 if the URL is empty, malformed or not HTTP(S)
/// - 429 if the client or the queue is over its limit
/// - 504 if the job outlives `JOB_TIMEOUT_SECONDS`; poll `/api/status/{jobId}`
pub async fn shorten_handler(
    State(state): State<AppState>,
    Json(payload): Json<ShortenRequest>,
) -> Result<Json<ShortenResponse>, AppError> {
    payload.validate()?;
    let canonical = canonicalize_url(&payload.url)?;

    let handle = state.shorten_queue.enqueue(canonical)?;
    debug!(
        job_id = handle.job_id(),
        deduplicated = handle.is_deduplicated(),
        "Shorten job submitted"
    );

    let code = handle.await_result(state.job_timeout).await?;

    Ok(Json(ShortenResponse {
        short_url: state.short_url(&code),
    }))
}
