mod conversations;
mod messages;
mod read_state;
mod typing;
mod users;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::uuid_at;
use crate::{StoreError, StoreResult};

fn user_exists(conn: &Connection, user_id: Uuid) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            [user_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn require_user(conn: &Connection, user_id: Uuid) -> StoreResult<()> {
    if user_exists(conn, user_id)? {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("user {}", user_id)))
    }
}

fn require_conversation(conn: &Connection, conversation_id: Uuid) -> StoreResult<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            [conversation_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))
}

fn is_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
            [conversation_id.to_string(), user_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Conversation must exist and `user_id` must belong to it.
/// The one permission rule for conversation-scoped writes: unknown ids are
/// NotFound, a known user outside the participant set is Unauthorized.
fn require_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> StoreResult<()> {
    require_conversation(conn, conversation_id)?;
    require_user(conn, user_id)?;
    if is_member(conn, conversation_id, user_id)? {
        Ok(())
    } else {
        Err(StoreError::Unauthorized(format!(
            "user {} is not a participant of conversation {}",
            user_id, conversation_id
        )))
    }
}

fn participant_ids(conn: &Connection, conversation_id: Uuid) -> StoreResult<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_members WHERE conversation_id = ?1 ORDER BY user_id",
    )?;
    let ids = stmt
        .query_map([conversation_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
