//! Error types for rollcall-ar
//!
//! [`AttendanceError`] is the engine's failure taxonomy. [`ApiError`] is what
//! administrative HTTP handlers return; hardware endpoints never surface
//! errors and answer with a reject code instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use rollcall_common::api::RejectReason;
use serde_json::json;
use thiserror::Error;

/// Engine failures
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Malformed or unknown input at ingestion, rejected without retry
    #[error("Validation failed: {0}")]
    Validation(RejectReason),

    /// Student directory could not resolve a student
    #[error("Directory lookup failed: {0}")]
    Lookup(String),

    /// Transient log or ledger write failed
    #[error("Persistence failure: {0}")]
    Persistence(#[from] rollcall_common::Error),

    /// A reconciliation run already holds the marker for this date
    #[error("Reconciliation already in progress for {0}")]
    SchedulingOverlap(NaiveDate),
}

impl From<RejectReason> for AttendanceError {
    fn from(reason: RejectReason) -> Self {
        AttendanceError::Validation(reason)
    }
}

impl From<sqlx::Error> for AttendanceError {
    fn from(err: sqlx::Error) -> Self {
        AttendanceError::Persistence(rollcall_common::Error::Database(err))
    }
}

impl AttendanceError {
    /// Reject code reported to a device when ingestion fails with this error
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            AttendanceError::Validation(reason) => *reason,
            AttendanceError::Lookup(_)
            | AttendanceError::Persistence(_)
            | AttendanceError::SchedulingOverlap(_) => RejectReason::StorageUnavailable,
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. reconciliation already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// rollcall-common error
    #[error("Common error: {0}")]
    Common(#[from] rollcall_common::Error),
}

impl From<AttendanceError> for ApiError {
    fn from(err: AttendanceError) -> Self {
        match err {
            AttendanceError::SchedulingOverlap(_) => ApiError::Conflict(err.to_string()),
            AttendanceError::Validation(reason) => {
                ApiError::BadRequest(reason.describe().to_string())
            }
            AttendanceError::Lookup(msg) => ApiError::Internal(msg),
            AttendanceError::Persistence(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
