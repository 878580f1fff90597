//! Application error taxonomy and its HTTP mapping.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::entities::MappingField;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorInfo,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Machine-readable error payload returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

/// Errors surfaced by the store, the generator, the queue and the HTTP layer.
///
/// Cache failures are represented by [`crate::infrastructure::cache::CacheError`]
/// and never leave the service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, details: Value },

    #[error("{message}")]
    NotFound { message: String, details: Value },

    /// A uniqueness violation on one of the two mapping columns.
    #[error("Duplicate {field}")]
    DuplicateKey { field: MappingField },

    #[error("Failed to generate a unique short code after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },

    /// The caller stopped waiting; the job itself keeps running.
    #[error("Timed out waiting for job {job_id}")]
    Timeout { job_id: u64 },

    #[error("{message}")]
    Internal { message: String, details: Value },
}

impl AppError {
    pub fn bad_request(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }
    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }
    pub fn internal(message: impl Into<String>, details: Value) -> Self {
        Self::Internal {
            message: message.into(),
            details,
        }
    }

    /// Stable identifier for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound { .. } => "not_found",
            AppError::DuplicateKey { .. } => "duplicate_key",
            AppError::GenerationExhausted { .. } => "generation_exhausted",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Timeout { .. } => "timeout",
            AppError::Internal { .. } => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::DuplicateKey { .. } => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::GenerationExhausted { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a queued job failing with this error is worth another attempt.
    ///
    /// Code derivation is deterministic, so an exhausted generation or a lost
    /// race on the original URL fails the same way on every rerun.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Validation { .. }
                | AppError::NotFound { .. }
                | AppError::GenerationExhausted { .. }
                | AppError::DuplicateKey {
                    field: MappingField::OriginalUrl
                }
        )
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let details = match self {
            AppError::Validation { details, .. }
            | AppError::NotFound { details, .. }
            | AppError::Internal { details, .. } => details.clone(),
            AppError::DuplicateKey { field } => json!({ "field": field.as_str() }),
            AppError::GenerationExhausted { attempts } => json!({ "attempts": attempts }),
            AppError::RateLimited { retry_after, .. } => json!({ "retryAfter": retry_after }),
            AppError::Timeout { job_id } => json!({ "jobId": job_id }),
        };

        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            AppError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_error_info(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::bad_request("Validation failed", json!(errors))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        map_sqlx_error(e)
    }
}

/// Maps a database error to the application taxonomy.
///
/// Unique violations are translated to [`AppError::DuplicateKey`] using the
/// constraint name to tell which column conflicted.
pub fn map_sqlx_error(e: sqlx::Error) -> AppError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        let field = match db.constraint() {
            Some(name) if name.contains("original") => MappingField::OriginalUrl,
            _ => MappingField::ShortCode,
        };
        return AppError::DuplicateKey { field };
    }

    tracing::error!(error = %e, "Database error");
    AppError::internal("Database error", json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after_header() {
        let response = AppError::rate_limited("slow down", 12).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::not_found("x", json!({})).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Timeout { job_id: 1 }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::GenerationExhausted { attempts: 4 }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        assert!(!AppError::not_found("x", json!({})).is_retryable());
        assert!(!AppError::bad_request("x", json!({})).is_retryable());
        assert!(AppError::internal("x", json!({})).is_retryable());
        assert!(
            AppError::DuplicateKey {
                field: MappingField::ShortCode
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_deterministic_mint_failures_are_final() {
        assert!(!AppError::GenerationExhausted { attempts: 4 }.is_retryable());
        assert!(
            !AppError::DuplicateKey {
                field: MappingField::OriginalUrl
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_timeout_details_carry_job_id() {
        let info = AppError::Timeout { job_id: 42 }.to_error_info();
        assert_eq!(info.code, "timeout");
        assert_eq!(info.details["jobId"], 42);
    }
}
