//! Federation sync endpoint

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::{PeerChange, SyncResult};
use crate::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// POST /federation/sync request
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub peer_id: String,
    pub changes: Vec<PeerChange>,
    /// Falls back to the `Idempotency-Key` header
    pub idempotency_key: Option<String>,
}

/// POST /federation/sync
pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncResult>> {
    let key = request.idempotency_key.clone().or_else(|| {
        headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let result = state
        .federation
        .sync(&request.peer_id, &request.changes, key.as_deref())
        .await?;
    Ok(Json(result))
}

pub fn federation_routes() -> Router<AppState> {
    Router::new().route("/federation/sync", post(sync))
}
