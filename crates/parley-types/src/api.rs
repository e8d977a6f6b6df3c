use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

/// Profile fields pushed by the identity provider at sign-in.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertUserRequest {
    pub identity_key: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertUserResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPresenceRequest {
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersQuery {
    #[serde(default)]
    pub q: String,
    /// Identity key of the caller, left out of the results.
    #[serde(default)]
    pub exclude: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConversationRequest {
    pub user_a: Uuid,
    pub user_b: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConversationRequest {
    /// Every member, creator included.
    pub participant_ids: Vec<Uuid>,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub conversation_id: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteMessageRequest {
    pub requester_id: Uuid,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub added: bool,
}

// -- Typing & read state --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTypingRequest {
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct TypingQuery {
    pub exclude: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub user_id: Uuid,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
