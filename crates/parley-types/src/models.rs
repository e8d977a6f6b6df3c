use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// All timestamps are milliseconds since the Unix epoch.
pub type Millis = i64;

/// Emoji -> users who reacted with it. An emoji is present only while at
/// least one user holds it.
pub type ReactionSet = BTreeMap<String, BTreeSet<Uuid>>;

/// Placeholder surfaced in conversation previews for soft-deleted messages.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Stable key issued by the identity provider.
    pub identity_key: String,
    pub name: String,
    pub email: String,
    pub image_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_ids: Vec<Uuid>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub last_activity: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Empty once the message is deleted.
    pub content: String,
    pub is_deleted: bool,
    pub created_at: Millis,
    pub reactions: ReactionSet,
}

impl Message {
    /// Text shown in conversation lists.
    pub fn preview(&self) -> &str {
        if self.is_deleted {
            DELETED_PLACEHOLDER
        } else {
            &self.content
        }
    }
}

/// A message resolved with its sender, as delivered in message feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub is_deleted: bool,
    pub created_at: Millis,
}

impl From<&Message> for MessageSummary {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            sender_id: msg.sender_id,
            preview: msg.preview().to_string(),
            is_deleted: msg.is_deleted,
            created_at: msg.created_at,
        }
    }
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<User>,
    pub last_message: Option<MessageSummary>,
    pub unread_count: u64,
}
