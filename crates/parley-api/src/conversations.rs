use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_gateway::views::EntityKey;
use parley_types::api::{ConversationCreated, DirectConversationRequest, GroupConversationRequest};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    pub user_id: Uuid,
}

/// POST /conversations/direct: get-or-create, safe to race.
pub async fn get_or_create_direct(
    State(state): State<AppState>,
    Json(req): Json<DirectConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let DirectConversationRequest { user_a, user_b } = req;
    let (conversation_id, created) = state
        .blocking(move |db| db.get_or_create_direct_conversation(user_a, user_b))
        .await?;

    if created {
        state.dispatcher.invalidate([
            EntityKey::Conversation(conversation_id),
            EntityKey::Membership(user_a),
            EntityKey::Membership(user_b),
        ]);
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ConversationCreated { conversation_id })))
}

/// POST /conversations/group
pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<GroupConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let members = req.participant_ids.clone();
    let conversation_id = state
        .blocking(move |db| db.create_group_conversation(&req.participant_ids, &req.name))
        .await?;

    state.dispatcher.invalidate(
        std::iter::once(EntityKey::Conversation(conversation_id))
            .chain(members.into_iter().map(EntityKey::Membership)),
    );

    Ok((StatusCode::CREATED, Json(ConversationCreated { conversation_id })))
}

/// GET /conversations?user_id=
pub async fn list_for_user(
    State(state): State<AppState>,
    Query(query): Query<ConversationListQuery>,
) -> ApiResult<impl IntoResponse> {
    let list = state
        .blocking(move |db| db.list_conversations_for_user(query.user_id))
        .await?;
    Ok(Json(list))
}
