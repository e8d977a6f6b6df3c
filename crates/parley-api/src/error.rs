use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use thiserror::Error;
use tracing::error;

use parley_db::StoreError;
use parley_types::api::ErrorBody;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(StoreError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Store(StoreError::Unauthorized(msg)) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Store(StoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            _ => {
                error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
