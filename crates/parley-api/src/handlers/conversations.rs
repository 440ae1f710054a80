//! Conversation, participant, and message handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::RequireAuth;
use crate::error::{ApiError, JsonBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationBody {
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationBody {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantBody {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// `GET /api/v1/conversations`
pub async fn list_conversations(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state
        .conversation_service()
        .list_conversations(user_id)
        .await?;
    Ok(Json(conversations))
}

/// `POST /api/v1/conversations`
pub async fn create_conversation(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    JsonBody(body): JsonBody<CreateConversationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_service()
        .create_conversation(user_id, body.participant_ids, body.title)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /api/v1/conversations/:id`
pub async fn get_conversation(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_service()
        .get_conversation(conversation_id, user_id)
        .await?;
    Ok(Json(conversation))
}

/// `PATCH /api/v1/conversations/:id`
pub async fn update_conversation(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    JsonBody(body): JsonBody<UpdateConversationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_service()
        .update_conversation(conversation_id, user_id, body.title)
        .await?;
    Ok(Json(conversation))
}

/// `POST /api/v1/conversations/:id/participants`
pub async fn add_participant(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    JsonBody(body): JsonBody<AddParticipantBody>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_service()
        .add_participant(conversation_id, user_id, body.user_id)
        .await?;
    Ok(Json(conversation))
}

/// `DELETE /api/v1/conversations/:id/participants/me`
pub async fn leave_conversation(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .conversation_service()
        .leave_conversation(conversation_id, user_id)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/v1/conversations/:id/messages?before=&limit=`
pub async fn list_messages(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .conversation_service()
        .list_messages(conversation_id, user_id, query.before, query.limit)
        .await?;
    Ok(Json(messages))
}

/// `POST /api/v1/conversations/:id/messages`
pub async fn send_message(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path(conversation_id): Path<Uuid>,
    JsonBody(body): JsonBody<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .conversation_service()
        .send_message(conversation_id, user_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/v1/conversations/:id/messages/:message_id/receipts`
pub async fn list_read_receipts(
    State(state): State<AppState>,
    RequireAuth { user_id }: RequireAuth,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let receipts = state
        .conversation_service()
        .list_read_receipts(conversation_id, message_id, user_id)
        .await?;
    Ok(Json(receipts))
}
