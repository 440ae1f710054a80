//! Read receipts, typing signals, and conversation search.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::error::{ApiError, JsonBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// `POST /api/v1/conversations/:id/read`
pub async fn mark_read(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    JsonBody(body): JsonBody<ReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .read_state()
        .record_read(conversation_id, body.message_id, user_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /api/v1/conversations/:id/typing`
pub async fn typing(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .read_state()
        .notify_typing(conversation_id, user_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/v1/conversations/:id/search?q=`
pub async fn search(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .read_state()
        .search(conversation_id, user_id, &query.q)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "items": items })))
}
