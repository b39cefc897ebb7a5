//! HTTP error mapping for sel-ingest

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Service error, mapped by variant
    #[error(transparent)]
    Service(#[from] sel_common::Error),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String, Option<Value>) {
        use sel_common::Error as E;

        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Service(err) => {
                let message = err.to_string();
                match err {
                    E::Validation(errors) => (
                        StatusCode::BAD_REQUEST,
                        "VALIDATION_ERROR",
                        message,
                        Some(json!({ "fields": errors })),
                    ),
                    E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message, None),
                    E::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
                    E::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", message, None),
                    E::InvalidTransition { .. } => {
                        (StatusCode::CONFLICT, "INVALID_TRANSITION", message, None)
                    }
                    E::PreviouslyRejected {
                        review_id,
                        reason,
                        reviewed_by,
                        reviewed_at,
                    } => (
                        StatusCode::CONFLICT,
                        "PREVIOUSLY_REJECTED",
                        message,
                        Some(json!({
                            "reviewId": review_id,
                            "reason": reason,
                            "reviewedBy": reviewed_by,
                            "reviewedAt": reviewed_at,
                        })),
                    ),
                    ref e if e.is_transient() => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "TRANSIENT_STORAGE",
                        message,
                        None,
                    ),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message, None),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = self.parts();

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
