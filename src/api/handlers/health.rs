//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{CheckStatus, HealthChecks, HealthResponse, QueueCheck};
use crate::application::queue::QueueStats;
use crate::state::AppState;

/// Returns service health status with component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: All components healthy
/// - **503 Service Unavailable**: One or more components degraded
///
/// # Components Checked
///
/// 1. **Database**: Runs a trivial query against the store
/// 2. **Cache**: Pings the shared cache
/// 3. **Queues**: Reports job counters and whether each queue still accepts work
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "checks": {
///     "database": { "status": "ok", "message": "Connected, 42 mappings" },
///     "cache": { "status": "ok", "message": "Shared cache reachable" },
///     "shorten_queue": {
///       "status": "ok",
///       "stats": { "waiting": 0, "active": 1, "delayed": 0, "completed": 12, "failed": 0, "accepting": true }
///     },
///     "redirect_queue": { "status": "ok", "stats": { "...": 0 } }
///   }
/// }
/// ```
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let database = check_database(&state).await;
    let cache = check_cache(&state).await;
    let shorten_queue = check_queue(state.shorten_queue.stats());
    let redirect_queue = check_queue(state.redirect_queue.stats());

    let all_healthy = database.is_ok()
        && cache.is_ok()
        && shorten_queue.status == "ok"
        && redirect_queue.status == "ok";

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            cache,
            shorten_queue,
            redirect_queue,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn check_database(state: &AppState) -> CheckStatus {
    let repo = state.url_service.repository();

    if !repo.health_check().await {
        return CheckStatus::error("Database connection failed");
    }

    match repo.count().await {
        Ok(count) => CheckStatus::ok(format!("Connected, {} mappings", count)),
        Err(e) => CheckStatus::error(format!("Database error: {}", e)),
    }
}

async fn check_cache(state: &AppState) -> CheckStatus {
    if state.url_service.cache().health_check().await {
        CheckStatus::ok("Shared cache reachable")
    } else {
        CheckStatus::error("Shared cache unreachable")
    }
}

fn check_queue(stats: QueueStats) -> QueueCheck {
    QueueCheck {
        status: if stats.accepting { "ok" } else { "draining" }.to_string(),
        stats,
    }
}
