//! Route configuration for `/api/*` and `/monitor/*`.

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::api::handlers::{
    cache_events_handler, clear_cache_handler, delete_cache_key_handler, list_cache_handler,
    shorten_handler, status_handler,
};
use crate::api::middleware::rate_limit;
use crate::state::AppState;

/// Routes nested under `/api`.
///
/// # Endpoints
///
/// - `POST /shorten`          - Shorten a URL (rate limited per client)
/// - `GET  /status/{job_id}`  - Poll a retained job
/// - `GET  /cache-events`     - SSE stream of cache mutations
pub fn api_routes(state: AppState) -> Router<AppState> {
    let shorten = Router::new()
        .route("/shorten", post(shorten_handler))
        .route_layer(middleware::from_fn_with_state(
            state,
            rate_limit::shorten_limit,
        ));

    Router::new()
        .merge(shorten)
        .route("/status/{job_id}", get(status_handler))
        .route("/cache-events", get(cache_events_handler))
}

/// Routes nested under `/monitor`.
///
/// # Endpoints
///
/// - `GET    /cache`        - List shared cache entries
/// - `DELETE /cache`        - Clear the shared cache
/// - `DELETE /cache/{key}`  - Remove one key, prefix included
pub fn monitor_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cache",
            get(list_cache_handler).delete(clear_cache_handler),
        )
        .route("/cache/{*key}", delete(delete_cache_key_handler))
}
