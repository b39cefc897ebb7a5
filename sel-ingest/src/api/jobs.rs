//! Operator endpoints for permanently failed jobs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::ApiResult;
use crate::jobs::Job;
use crate::AppState;

/// GET /admin/jobs/failed
pub async fn list_failed(State(state): State<AppState>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.jobs.list_failed().await?))
}

/// POST /admin/jobs/:id/retry
///
/// Re-queues a failed job with a fresh retry budget.
pub async fn retry_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Job>> {
    let job = state.jobs.retry_failed(id).await?;
    tracing::info!(job_id = id, job_type = %job.job_type, "Failed job re-queued by operator");
    Ok(Json(job))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/jobs/failed", get(list_failed))
        .route("/admin/jobs/:id/retry", post(retry_job))
}
