//! Review queue endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::models::{ReviewEntry, ReviewStatus};
use crate::services::review_queue::ReviewPage;
use crate::services::FixOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Defaults to pending
    pub status: Option<ReviewStatus>,
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FixRequest {
    pub reviewer: String,
    pub corrections: Map<String, Value>,
    pub notes: Option<String>,
}

fn require_reviewer(reviewer: &str) -> ApiResult<()> {
    if reviewer.trim().is_empty() {
        return Err(ApiError::BadRequest("reviewer is required".to_string()));
    }
    Ok(())
}

/// GET /admin/review
pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ReviewPage>> {
    let status = params.status.unwrap_or(ReviewStatus::Pending);
    let page = state.review.list(Some(status), params.cursor, params.limit).await?;
    Ok(Json(page))
}

/// GET /admin/review/:id
pub async fn get_entry(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ReviewEntry>> {
    Ok(Json(state.review.get(id).await?))
}

/// POST /admin/review/:id/approve
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<ReviewEntry>> {
    require_reviewer(&request.reviewer)?;
    let entry = state
        .review
        .approve(id, &request.reviewer, request.notes.as_deref())
        .await?;
    Ok(Json(entry))
}

/// POST /admin/review/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<ReviewEntry>> {
    require_reviewer(&request.reviewer)?;
    if request.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason is required".to_string()));
    }
    let entry = state.review.reject(id, &request.reviewer, &request.reason).await?;
    Ok(Json(entry))
}

/// POST /admin/review/:id/fix
pub async fn fix(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<FixRequest>,
) -> ApiResult<Json<FixOutcome>> {
    require_reviewer(&request.reviewer)?;
    let outcome = state
        .review
        .fix(id, &request.reviewer, &request.corrections, request.notes.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/review", get(list_entries))
        .route("/admin/review/:id", get(get_entry))
        .route("/admin/review/:id/approve", post(approve))
        .route("/admin/review/:id/reject", post(reject))
        .route("/admin/review/:id/fix", post(fix))
}
