use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::views::EntityKey;
use parley_types::api::{DeleteMessageRequest, MessageCreated, SendMessageRequest};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /conversations/{conversation_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message_id = state
        .blocking(move |db| db.send_message(conversation_id, req.sender_id, &req.content))
        .await?;

    state.dispatcher.invalidate([EntityKey::Conversation(conversation_id)]);
    Ok((StatusCode::CREATED, Json(MessageCreated { message_id })))
}

/// GET /conversations/{conversation_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let feed = state.blocking(move |db| db.list_messages(conversation_id)).await?;
    Ok(Json(feed))
}

/// DELETE /messages/{message_id}: sender only. Content is cleared, the
/// message keeps its slot and reactions.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<DeleteMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_id = state
        .blocking(move |db| db.delete_message(message_id, req.requester_id))
        .await?;

    state.dispatcher.invalidate([EntityKey::Conversation(conversation_id)]);
    Ok(StatusCode::NO_CONTENT)
}
