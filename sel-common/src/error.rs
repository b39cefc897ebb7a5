//! Common error types for the SEL services

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Common result type for SEL operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Common error types across SEL crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error for stored payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request parameter (not a payload problem)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed submission; never retried
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// Idempotency or dedup race lost, or an idempotency key reused with a different body
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resubmission of content that a reviewer already rejected
    #[error("Previously rejected by {reviewed_by} at {reviewed_at}: {reason}")]
    PreviouslyRejected {
        review_id: i64,
        reason: String,
        reviewed_by: String,
        reviewed_at: DateTime<Utc>,
    },

    /// Storage busy or unavailable; safe to retry with backoff
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Retry budget exhausted; requires operator action
    #[error("Job {job_id} ({job_type}) failed permanently after {attempts} attempts: {last_error}")]
    PermanentJobFailure {
        job_id: i64,
        job_type: String,
        attempts: u32,
        last_error: String,
    },

    /// Review state machine rejected an action for the current status
    #[error("Invalid transition: cannot {action} a {from} entry")]
    InvalidTransition { from: String, action: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a single-field validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(vec![FieldError::new(field, message)])
    }

    /// True for lock/busy/pool-exhaustion failures that a retry can clear
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStorage(_) => true,
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }

    /// True when the store rejected a write because of a uniqueness constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}
