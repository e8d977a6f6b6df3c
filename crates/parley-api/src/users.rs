use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_db::StoreError;
use parley_gateway::views::EntityKey;
use parley_types::api::{SearchUsersQuery, SetPresenceRequest, UpsertUserRequest, UpsertUserResponse};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /users: sign-in sync from the identity provider.
pub async fn upsert_user(
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = state
        .blocking(move |db| {
            db.upsert_user(&req.identity_key, &req.name, &req.email, req.image_url.as_deref())
        })
        .await?;

    state.dispatcher.invalidate([EntityKey::User(user_id)]);
    Ok(Json(UpsertUserResponse { user_id }))
}

/// PUT /users/{identity_key}/presence: never fails for unknown users.
pub async fn set_presence(
    State(state): State<AppState>,
    Path(identity_key): Path<String>,
    Json(req): Json<SetPresenceRequest>,
) -> ApiResult<impl IntoResponse> {
    let touched = state
        .blocking(move |db| db.set_online_status(&identity_key, req.is_online))
        .await?;

    if let Some(user_id) = touched {
        state.dispatcher.invalidate([EntityKey::User(user_id)]);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{identity_key}
pub async fn get_user(
    State(state): State<AppState>,
    Path(identity_key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .blocking(move |db| {
            db.get_user_by_identity(&identity_key)?
                .ok_or_else(|| StoreError::NotFound(format!("identity {}", identity_key)))
        })
        .await?;
    Ok(Json(user))
}

/// GET /users/search?q=&exclude=
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchUsersQuery>,
) -> ApiResult<impl IntoResponse> {
    let users = state
        .blocking(move |db| db.search_users(&query.q, &query.exclude))
        .await?;
    Ok(Json(users))
}
