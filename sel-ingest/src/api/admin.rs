//! Admin endpoints: entity inspection, merge, delete, duplicate candidates
//! and federation peers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::duplicates::{self, DuplicateCandidate};
use crate::db::{entities, provenance, tombstones};
use crate::error::{ApiError, ApiResult};
use crate::models::provenance::DEFAULT_TRUST;
use crate::models::{CanonicalEntity, EntityKind, FederationNode, FieldProvenance, SourceRecord, Tombstone};
use crate::services::MergeOutcome;
use crate::utils::retry_on_lock;
use crate::AppState;

/// GET /admin/entities/:id response
#[derive(Debug, Serialize)]
pub struct EntityDetail {
    pub entity: CanonicalEntity,
    pub sources: Vec<SourceRecord>,
    pub provenance: Vec<FieldProvenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<Tombstone>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub entity_id: Uuid,
    pub sequence_number: i64,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub winner_id: Uuid,
    pub loser_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DuplicateParams {
    pub kind: Option<EntityKind>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPeerRequest {
    pub peer_id: String,
    pub node_domain: String,
    pub base_url: String,
    pub trust_level: Option<u8>,
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,
}

fn default_sync_enabled() -> bool {
    true
}

/// GET /admin/entities/:id
pub async fn get_entity(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<EntityDetail>> {
    let mut conn = state.store.read().await?;
    let entity = entities::get_entity(&mut conn, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("entity {}", id)))?;
    let sources = provenance::list_source_records(&mut conn, id).await?;
    let provenance = provenance::list_field_provenance(&mut conn, id).await?;
    let tombstone = tombstones::find_for_entity(&mut conn, id).await?;

    Ok(Json(EntityDetail {
        entity,
        sources,
        provenance,
        tombstone,
    }))
}

/// DELETE /admin/entities/:id
pub async fn delete_entity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Json<DeleteResponse>> {
    let sequence_number = state.coordinator.delete_entity(id, params.reason.as_deref()).await?;
    Ok(Json(DeleteResponse {
        entity_id: id,
        sequence_number,
    }))
}

/// POST /admin/merge
pub async fn merge(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<MergeOutcome>> {
    let outcome = state
        .dedup
        .merge(&state.store, request.winner_id, request.loser_id, Utc::now())
        .await?;
    Ok(Json(outcome))
}

/// GET /admin/duplicates
pub async fn list_duplicates(
    State(state): State<AppState>,
    Query(params): Query<DuplicateParams>,
) -> ApiResult<Json<Vec<DuplicateCandidate>>> {
    let mut conn = state.store.read().await?;
    Ok(Json(duplicates::list_open(&mut conn, params.kind).await?))
}

/// POST /admin/duplicates/:id/dismiss
pub async fn dismiss_duplicate(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    retry_on_lock("dismiss_duplicate", state.store.max_lock_wait_ms(), || async {
        let mut tx = state.store.begin_write("dismiss_duplicate").await?;
        duplicates::dismiss(tx.conn(), id).await?;
        tx.commit().await
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /admin/federation/peers
pub async fn list_peers(State(state): State<AppState>) -> ApiResult<Json<Vec<FederationNode>>> {
    Ok(Json(state.federation.list_peers().await?))
}

/// POST /admin/federation/peers
pub async fn register_peer(
    State(state): State<AppState>,
    Json(request): Json<RegisterPeerRequest>,
) -> ApiResult<Json<FederationNode>> {
    let node = state
        .federation
        .register_peer(
            &request.peer_id,
            &request.node_domain,
            &request.base_url,
            request.trust_level.unwrap_or(DEFAULT_TRUST),
            request.sync_enabled,
        )
        .await?;
    Ok(Json(node))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/entities/:id", get(get_entity).delete(delete_entity))
        .route("/admin/merge", post(merge))
        .route("/admin/duplicates", get(list_duplicates))
        .route("/admin/duplicates/:id/dismiss", post(dismiss_duplicate))
        .route("/admin/federation/peers", get(list_peers).post(register_peer))
}
