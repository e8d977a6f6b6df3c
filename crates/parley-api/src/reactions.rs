use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_gateway::views::EntityKey;
use parley_types::api::{ToggleReactionRequest, ToggleReactionResponse};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /messages/{message_id}/reactions
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let (added, conversation_id) = state
        .blocking(move |db| db.toggle_reaction(message_id, req.user_id, &req.emoji))
        .await?;

    state.dispatcher.invalidate([EntityKey::Conversation(conversation_id)]);
    Ok(Json(ToggleReactionResponse { added }))
}
