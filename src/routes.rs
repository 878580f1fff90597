//! Top-level router configuration.
//!
//! # Route Structure
//!
//! - `GET  /{code}`      - Short link redirect (rate limited per client and code)
//! - `GET  /health`      - Health check: store, cache, queues
//! - `/api/*`            - Shorten, job status, cache event stream
//! - `/monitor/*`        - Shared cache inspection
//!
//! # Middleware
//!
//! - **Tracing** - Structured request/response logging
//! - **Rate limiting** - Per-client keyed token buckets on shorten and redirect
//! - **Path normalization** - Trailing slash handling

use crate::api;
use crate::api::handlers::{health_handler, redirect_handler};
use crate::api::middleware::{rate_limit, tracing};
use crate::state::AppState;
use axum::routing::get;
use axum::{Router, middleware};
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};

/// Constructs the application router with all routes and middleware.
///
/// Rate limiting reads the client address from the `ConnectInfo` extension,
/// so serve it with `into_make_service_with_connect_info::<SocketAddr>()`.
/// Without it every client shares the `unknown` bucket.
pub fn app_router(state: AppState) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Routes and middleware without path normalization.
pub fn router(state: AppState) -> Router {
    let redirect = Router::new()
        .route("/{code}", get(redirect_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::redirect_limit,
        ));

    Router::new()
        .merge(redirect)
        .route("/health", get(health_handler))
        .nest("/api", api::routes::api_routes(state.clone()))
        .nest("/monitor", api::routes::monitor_routes())
        .with_state(state)
        .layer(tracing::layer())
}
