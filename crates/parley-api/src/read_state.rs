use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::views::EntityKey;
use parley_types::api::MarkReadRequest;

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /conversations/{conversation_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = req.user_id;
    state.blocking(move |db| db.mark_read(conversation_id, user_id)).await?;

    state.dispatcher.invalidate([EntityKey::ReadState(conversation_id, user_id)]);
    Ok(StatusCode::NO_CONTENT)
}
