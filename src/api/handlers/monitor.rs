//! Handlers for inspecting and clearing the shared cache.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::dto::monitor::{CacheClearedResponse, CacheKeyDeletedResponse, CacheListResponse};
use crate::error::AppError;
use crate::state::AppState;

/// Lists every `original:*` and `short:*` entry with its remaining TTL.
///
/// `GET /monitor/cache`
pub async fn list_cache_handler(
    State(state): State<AppState>,
) -> Result<Json<CacheListResponse>, AppError> {
    let entries = state.url_service.inspect_cache().await?;

    Ok(Json(CacheListResponse {
        count: entries.len(),
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

/// Clears the shared cache. The store is untouched, so subsequent lookups
/// repopulate it.
///
/// `DELETE /monitor/cache`
pub async fn clear_cache_handler(
    State(state): State<AppState>,
) -> Result<Json<CacheClearedResponse>, AppError> {
    let deleted = state.url_service.clear_cache().await?;

    Ok(Json(CacheClearedResponse {
        message: "Cache cleared".to_string(),
        deleted,
    }))
}

/// Removes a single cache key.
///
/// `DELETE /monitor/cache/{key}`, where `key` keeps its prefix, e.g.
/// `short:3f9a1c2` or `original:https://example.com`.
///
/// # Errors
///
/// - 400 if the key is outside the managed prefixes
/// - 404 if the key does not exist
pub async fn delete_cache_key_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CacheKeyDeletedResponse>, AppError> {
    state.url_service.evict_cache_key(&key).await?;

    Ok(Json(CacheKeyDeletedResponse {
        message: "Cache key deleted".to_string(),
        key,
    }))
}
