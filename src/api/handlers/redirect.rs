//! Handler for short URL redirect.

use axum::{
    extract::{Path, State},
    response::Redirect,
};
use serde_json::json;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;
use crate::utils::url_normalizer::ensure_protocol;

/// Redirects a short code to its original URL.
///
/// # Endpoint
///
/// `GET /{code}`
///
/// # Request Flow
///
/// 1. Reject codes containing `.` (asset requests such as `favicon.ico`)
/// 2. Submit the code to the redirect queue
/// 3. The worker resolves it: shared cache first, then the store
/// 4. Return 307 Temporary Redirect
///
/// # Errors
///
/// - 404 if the code is unknown or contains `.`
/// - 429 if the client or the queue is over its limit
/// - 504 if the lookup outlives `JOB_TIMEOUT_SECONDS`
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Redirect, AppError> {
    if code.contains('.') {
        return Err(AppError::not_found(
            "Short URL not found",
            json!({ "shortCode": code }),
        ));
    }

    let handle = state.redirect_queue.enqueue(code.clone())?;
    let original_url = handle.await_result(state.job_timeout).await?;

    debug!(code = %code, target = %original_url, "Redirecting");

    Ok(Redirect::temporary(&ensure_protocol(&original_url)))
}
