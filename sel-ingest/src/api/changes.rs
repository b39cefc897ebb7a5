//! Change feed endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::ChangeAction;
use crate::services::ChangePage;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangeParams {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    pub action: Option<ChangeAction>,
}

/// GET /changes
pub async fn list_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangeParams>,
) -> ApiResult<Json<ChangePage>> {
    let page = state
        .changes
        .list(params.cursor.as_deref(), params.limit, params.action)
        .await?;
    Ok(Json(page))
}

pub fn change_routes() -> Router<AppState> {
    Router::new().route("/changes", get(list_changes))
}
