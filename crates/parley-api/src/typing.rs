use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::views::EntityKey;
use parley_types::api::{SetTypingRequest, TypingQuery};

use crate::error::ApiResult;
use crate::state::AppState;

/// PUT /conversations/{conversation_id}/typing
///
/// REST callers own their debounce; only gateway signals get the server-side one.
pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SetTypingRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .blocking(move |db| db.set_typing(conversation_id, req.user_id, req.is_typing))
        .await?;

    state.dispatcher.invalidate([EntityKey::Typing(conversation_id)]);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /conversations/{conversation_id}/typing?exclude=
pub async fn list_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<TypingQuery>,
) -> ApiResult<impl IntoResponse> {
    let users = state
        .blocking(move |db| db.list_typing_users(conversation_id, query.exclude))
        .await?;
    Ok(Json(users))
}
