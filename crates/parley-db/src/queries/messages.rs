use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::models::{Message, MessageView, Millis, ReactionSet};

use super::require_member;
use crate::models::{MESSAGE_COLUMNS, USER_COLUMNS, message_at, user_at, uuid_at};
use crate::{Database, StoreError, StoreResult};

impl Database {
    // -- Messages --

    /// Append a message and advance the conversation's last activity.
    ///
    /// The creation timestamp is strictly greater than every message and read
    /// receipt already recorded for the conversation, so ordering and unread
    /// counts never see ties.
    pub fn send_message(&self, conversation_id: Uuid, sender_id: Uuid, content: &str) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let now = self.now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            require_member(&tx, conversation_id, sender_id)?;

            let floor: Millis = tx.query_row(
                "SELECT MAX(
                    COALESCE((SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1), 0),
                    COALESCE((SELECT MAX(last_read) FROM read_receipts WHERE conversation_id = ?1), 0))",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            let created_at = now.max(floor + 1);

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, is_deleted, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![
                    id.to_string(),
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    content,
                    created_at
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET last_activity = MAX(last_activity, ?1) WHERE id = ?2",
                rusqlite::params![created_at, conversation_id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(id)
    }

    /// Every message of the conversation in creation order, with reactions
    /// and the resolved sender. Unknown conversations yield an empty feed.
    pub fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<MessageView>> {
        self.with_read(|conn| {
            // JOIN users to resolve senders in a single query
            let sql = format!(
                "SELECT {}, {}
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at ASC",
                MESSAGE_COLUMNS, USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut views = stmt
                .query_map([conversation_id.to_string()], |row| {
                    let message = message_at(row, 0)?;
                    let sender = match row.get::<_, Option<String>>(6)? {
                        Some(_) => Some(user_at(row, 6)?),
                        None => None,
                    };
                    Ok(MessageView { message, sender })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut reactions = query_conversation_reactions(conn, conversation_id)?;
            for view in &mut views {
                if let Some(set) = reactions.remove(&view.message.id) {
                    view.message.reactions = set;
                }
            }
            Ok(views)
        })
    }

    pub fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        self.with_read(|conn| query_message(conn, id))
    }

    /// Soft delete: content is cleared and the flag set, reactions and
    /// position are kept. Only the sender may delete; repeating the delete
    /// is a no-op. Returns the owning conversation.
    pub fn delete_message(&self, message_id: Uuid, requester_id: Uuid) -> StoreResult<Uuid> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let (conversation_id, sender_id) = query_message_owner(&tx, message_id)?;
            if sender_id != requester_id {
                return Err(StoreError::Unauthorized(format!(
                    "user {} did not send message {}",
                    requester_id, message_id
                )));
            }

            tx.execute(
                "UPDATE messages SET is_deleted = 1, content = '' WHERE id = ?1",
                [message_id.to_string()],
            )?;
            tx.commit()?;
            Ok(conversation_id)
        })
    }

    /// Toggle `user_id`'s `emoji` reaction on a message. Only participants
    /// of the message's conversation may react. Returns `(added, conversation_id)`: `added = false` means it was removed.
    pub fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> StoreResult<(bool, Uuid)> {
        if emoji.trim().is_empty() {
            return Err(StoreError::Validation("emoji must not be empty".into()));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let (conversation_id, _) = query_message_owner(&tx, message_id)?;
            require_member(&tx, conversation_id, user_id)?;

            let (mid, uid) = (message_id.to_string(), user_id.to_string());
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND emoji = ?2 AND user_id = ?3",
                rusqlite::params![mid, emoji, uid],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, emoji, user_id) VALUES (?1, ?2, ?3)",
                    rusqlite::params![mid, emoji, uid],
                )?;
            }
            tx.commit()?;
            Ok((removed == 0, conversation_id))
        })
    }
}

fn query_message_owner(conn: &Connection, message_id: Uuid) -> StoreResult<(Uuid, Uuid)> {
    conn.query_row(
        "SELECT conversation_id, sender_id FROM messages WHERE id = ?1",
        [message_id.to_string()],
        |row| Ok((uuid_at(row, 0)?, uuid_at(row, 1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))
}

fn query_message(conn: &Connection, id: Uuid) -> StoreResult<Option<Message>> {
    let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
    let Some(mut message) = conn
        .query_row(&sql, [id.to_string()], |row| message_at(row, 0))
        .optional()?
    else {
        return Ok(None);
    };
    message.reactions = query_message_reactions(conn, id)?;
    Ok(Some(message))
}

/// Newest message of a conversation, deleted or not.
pub(super) fn query_last_message(conn: &Connection, conversation_id: Uuid) -> StoreResult<Option<Message>> {
    let id = conn
        .query_row(
            "SELECT id FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT 1",
            [conversation_id.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;

    match id {
        Some(id) => query_message(conn, id),
        None => Ok(None),
    }
}

fn query_message_reactions(conn: &Connection, message_id: Uuid) -> StoreResult<ReactionSet> {
    let mut stmt = conn.prepare("SELECT emoji, user_id FROM reactions WHERE message_id = ?1")?;
    let mut set = ReactionSet::new();
    let rows = stmt.query_map([message_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, uuid_at(row, 1)?))
    })?;
    for row in rows {
        let (emoji, user_id) = row?;
        set.entry(emoji).or_default().insert(user_id);
    }
    Ok(set)
}

/// Batch-fetch reactions for every message of a conversation, grouped by message.
fn query_conversation_reactions(
    conn: &Connection,
    conversation_id: Uuid,
) -> StoreResult<HashMap<Uuid, ReactionSet>> {
    let mut stmt = conn.prepare(
        "SELECT r.message_id, r.emoji, r.user_id
         FROM reactions r
         JOIN messages m ON m.id = r.message_id
         WHERE m.conversation_id = ?1",
    )?;
    let rows = stmt.query_map([conversation_id.to_string()], |row| {
        Ok((uuid_at(row, 0)?, row.get::<_, String>(1)?, uuid_at(row, 2)?))
    })?;

    let mut grouped: HashMap<Uuid, ReactionSet> = HashMap::new();
    for row in rows {
        let (message_id, emoji, user_id) = row?;
        grouped
            .entry(message_id)
            .or_default()
            .entry(emoji)
            .or_default()
            .insert(user_id);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::{Database, ManualClock, StoreError};

    struct Fixture {
        db: Database,
        clock: Arc<ManualClock>,
        alice: Uuid,
        bob: Uuid,
        eve: Uuid,
        conv: Uuid,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let db = Database::open_in_memory().unwrap().with_clock(clock.clone());
        let alice = db.upsert_user("idp|alice", "Alice", "", None).unwrap();
        let bob = db.upsert_user("idp|bob", "Bob", "", None).unwrap();
        let eve = db.upsert_user("idp|eve", "Eve", "", None).unwrap();
        let (conv, _) = db.get_or_create_direct_conversation(alice, bob).unwrap();
        Fixture { db, clock, alice, bob, eve, conv }
    }

    #[test]
    fn send_and_list_in_creation_order() {
        let f = fixture();
        let first = f.db.send_message(f.conv, f.alice, "hi").unwrap();
        let second = f.db.send_message(f.conv, f.bob, "hey").unwrap();

        let feed = f.db.list_messages(f.conv).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].message.id, first);
        assert_eq!(feed[1].message.id, second);
        assert_eq!(feed[0].sender.as_ref().unwrap().name, "Alice");
        assert!(feed[0].message.reactions.is_empty());
        assert!(!feed[0].message.is_deleted);
        // same clock reading, still strictly increasing
        assert!(feed[1].message.created_at > feed[0].message.created_at);
    }

    #[test]
    fn send_advances_last_activity() {
        let f = fixture();
        f.clock.advance(500);
        f.db.send_message(f.conv, f.alice, "hi").unwrap();
        let conv = f.db.get_conversation(f.conv).unwrap().unwrap();
        assert_eq!(conv.last_activity, 10_500);
    }

    #[test]
    fn non_participant_cannot_send() {
        let f = fixture();
        let err = f.db.send_message(f.conv, f.eve, "let me in").unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(f.db.list_messages(f.conv).unwrap().is_empty());

        let err = f.db.send_message(Uuid::new_v4(), f.alice, "void").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_keeps_reactions_and_position() {
        let f = fixture();
        let a = f.db.send_message(f.conv, f.alice, "one").unwrap();
        let b = f.db.send_message(f.conv, f.alice, "two").unwrap();
        f.db.toggle_reaction(a, f.bob, "👍").unwrap();

        assert_eq!(f.db.delete_message(a, f.alice).unwrap(), f.conv);

        let feed = f.db.list_messages(f.conv).unwrap();
        assert_eq!(feed[0].message.id, a);
        assert_eq!(feed[1].message.id, b);
        assert!(feed[0].message.is_deleted);
        assert_eq!(feed[0].message.content, "");
        assert!(feed[0].message.reactions["👍"].contains(&f.bob));

        // second delete by the sender is a no-op
        let before = f.db.get_message(a).unwrap();
        f.db.delete_message(a, f.alice).unwrap();
        assert_eq!(f.db.get_message(a).unwrap(), before);
    }

    #[test]
    fn delete_by_non_sender_is_unauthorized() {
        let f = fixture();
        let id = f.db.send_message(f.conv, f.alice, "mine").unwrap();
        let err = f.db.delete_message(id, f.bob).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let msg = f.db.get_message(id).unwrap().unwrap();
        assert_eq!(msg.content, "mine");
        assert!(!msg.is_deleted);

        let err = f.db.delete_message(Uuid::new_v4(), f.alice).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn toggle_reaction_is_an_involution() {
        let f = fixture();
        let id = f.db.send_message(f.conv, f.alice, "react to me").unwrap();
        f.db.toggle_reaction(id, f.alice, "🔥").unwrap();
        let before = f.db.get_message(id).unwrap().unwrap().reactions;

        assert_eq!(f.db.toggle_reaction(id, f.bob, "🔥").unwrap(), (true, f.conv));
        let during = f.db.get_message(id).unwrap().unwrap().reactions;
        assert_eq!(during["🔥"].len(), 2);

        assert_eq!(f.db.toggle_reaction(id, f.bob, "🔥").unwrap(), (false, f.conv));
        assert_eq!(f.db.get_message(id).unwrap().unwrap().reactions, before);
    }

    #[test]
    fn emptied_emoji_entry_is_dropped() {
        let f = fixture();
        let id = f.db.send_message(f.conv, f.alice, "hi").unwrap();
        f.db.toggle_reaction(id, f.bob, "😂").unwrap();
        f.db.toggle_reaction(id, f.bob, "😂").unwrap();
        let reactions = f.db.get_message(id).unwrap().unwrap().reactions;
        assert!(!reactions.contains_key("😂"));
    }

    #[test]
    fn toggle_reaction_on_missing_message_is_not_found() {
        let f = fixture();
        let err = f.db.toggle_reaction(Uuid::new_v4(), f.bob, "👍").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn outsider_cannot_react() {
        let f = fixture();
        let id = f.db.send_message(f.conv, f.alice, "members only").unwrap();
        let err = f.db.toggle_reaction(id, f.eve, "👀").unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(f.db.get_message(id).unwrap().unwrap().reactions.is_empty());

        let err = f.db.toggle_reaction(id, Uuid::new_v4(), "👀").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
