//! Ingestion endpoints
//!
//! POST /events, POST /events/batch, GET /batches/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{BatchStatus, Disposition, IngestOutcome, IngestStatus, SourceMeta};
use crate::AppState;

/// POST /events request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub source: SourceMeta,
    /// Event payload as the producer sent it
    pub event: Value,
}

/// POST /events/batch request
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub source: SourceMeta,
    pub events: Vec<Value>,
}

/// POST /events/batch response
#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub batch_id: Uuid,
    pub item_count: usize,
    pub status: String,
}

fn ingest_status(outcome: &IngestOutcome) -> StatusCode {
    match (outcome.status, outcome.disposition) {
        (_, Disposition::Unchanged) => StatusCode::OK,
        (IngestStatus::Published, _) => StatusCode::CREATED,
        (IngestStatus::Queued, _) => StatusCode::ACCEPTED,
    }
}

/// POST /events
///
/// 201 when published, 202 when queued for review, 200 for an identical
/// resubmission.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestOutcome>)> {
    let outcome = state.coordinator.ingest(&request.event, &request.source).await?;
    Ok((ingest_status(&outcome), Json(outcome)))
}

/// POST /events/batch
///
/// Stores the batch and returns at once; items are ingested by a background job.
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchAccepted>)> {
    let item_count = request.events.len();
    let batch_id = state.batches.submit(request.events, request.source).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id,
            item_count,
            status: "accepted".to_string(),
        }),
    ))
}

/// GET /batches/:id
pub async fn batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchStatus>> {
    Ok(Json(state.batches.status(batch_id).await?))
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/events/batch", post(ingest_batch))
        .route("/batches/:id", get(batch_status))
}
