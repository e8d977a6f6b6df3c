//! Database row types and column decoders. Rows that surface through the API
//! are decoded straight into `parley_types` models; the ephemeral per-user
//! records stay here.

use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::models::{Message, Millis, ReactionSet, User};

/// Upserted on every keystroke-level typing signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingRow {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
    pub updated_at: Millis,
}

/// A user currently typing, with the time of their latest signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typist {
    pub user: User,
    pub updated_at: Millis,
}

pub(crate) const USER_COLUMNS: &str =
    "u.id, u.identity_key, u.name, u.email, u.image_url, u.is_online, u.last_seen";

pub(crate) const MESSAGE_COLUMNS: &str =
    "m.id, m.conversation_id, m.sender_id, m.content, m.is_deleted, m.created_at";

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode the seven `USER_COLUMNS` starting at `offset`.
pub(crate) fn user_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, offset)?,
        identity_key: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        email: row.get(offset + 3)?,
        image_url: row.get(offset + 4)?,
        is_online: row.get(offset + 5)?,
        last_seen: row.get(offset + 6)?,
    })
}

/// Decode the six `MESSAGE_COLUMNS` starting at `offset`. Reactions are
/// attached separately.
pub(crate) fn message_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, offset)?,
        conversation_id: uuid_at(row, offset + 1)?,
        sender_id: uuid_at(row, offset + 2)?,
        content: row.get(offset + 3)?,
        is_deleted: row.get(offset + 4)?,
        created_at: row.get(offset + 5)?,
        reactions: ReactionSet::new(),
    })
}
