use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::models::Millis;

use super::require_member;
use crate::{Database, StoreResult};

impl Database {
    // -- Read state --

    /// Record that `user_id` has seen the conversation up to now. The stored
    /// mark covers every message accepted before this call and never moves
    /// backwards. Returns the stored mark.
    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Millis> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            require_member(conn, conversation_id, user_id)?;

            let latest: Millis = conn.query_row(
                "SELECT COALESCE(MAX(created_at), 0) FROM messages WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;

            let mark = conn.query_row(
                "INSERT INTO read_receipts (conversation_id, user_id, last_read)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                    last_read = MAX(last_read, excluded.last_read)
                 RETURNING last_read",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), now.max(latest)],
                |row| row.get(0),
            )?;
            Ok(mark)
        })
    }

    pub fn last_read(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<Millis>> {
        self.with_read(|conn| query_last_read(conn, conversation_id, user_id))
    }

    /// Messages from other users newer than `user_id`'s read mark. An absent
    /// mark counts as zero, so everything from others is unread.
    pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        self.with_read(|conn| query_unread_count(conn, conversation_id, user_id))
    }
}

fn query_last_read(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<Millis>> {
    let mark = conn
        .query_row(
            "SELECT last_read FROM read_receipts WHERE conversation_id = ?1 AND user_id = ?2",
            [conversation_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(mark)
}

// TODO: replace the scan with a per-(conversation, user) counter maintained in
// send_message and mark_read once conversations grow past a few thousand messages.
pub(super) fn query_unread_count(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
    let since = query_last_read(conn, conversation_id, user_id)?.unwrap_or(0);
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ?1 AND sender_id != ?2 AND created_at > ?3",
        rusqlite::params![conversation_id.to_string(), user_id.to_string(), since],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::{Database, ManualClock, StoreError};

    fn setup() -> (Database, Arc<ManualClock>, Uuid, Uuid, Uuid) {
        let clock = Arc::new(ManualClock::new(1_000));
        let db = Database::open_in_memory().unwrap().with_clock(clock.clone());
        let alice = db.upsert_user("idp|alice", "Alice", "", None).unwrap();
        let bob = db.upsert_user("idp|bob", "Bob", "", None).unwrap();
        let (conv, _) = db.get_or_create_direct_conversation(alice, bob).unwrap();
        (db, clock, alice, bob, conv)
    }

    #[test]
    fn absent_receipt_counts_everything_from_others() {
        let (db, _, alice, bob, conv) = setup();
        db.send_message(conv, alice, "one").unwrap();
        db.send_message(conv, alice, "two").unwrap();
        db.send_message(conv, bob, "mine").unwrap();

        assert_eq!(db.last_read(conv, bob).unwrap(), None);
        assert_eq!(db.unread_count(conv, bob).unwrap(), 2);
        assert_eq!(db.unread_count(conv, alice).unwrap(), 1);
    }

    #[test]
    fn mark_read_resets_to_messages_sent_after() {
        let (db, clock, alice, bob, conv) = setup();
        db.send_message(conv, alice, "one").unwrap();
        db.send_message(conv, alice, "two").unwrap();
        db.mark_read(conv, bob).unwrap();
        assert_eq!(db.unread_count(conv, bob).unwrap(), 0);

        // same millisecond as the mark: still counted as after it
        db.send_message(conv, alice, "three").unwrap();
        assert_eq!(db.unread_count(conv, bob).unwrap(), 1);

        clock.advance(1_000);
        db.send_message(conv, alice, "four").unwrap();
        assert_eq!(db.unread_count(conv, bob).unwrap(), 2);

        db.mark_read(conv, bob).unwrap();
        assert_eq!(db.unread_count(conv, bob).unwrap(), 0);
    }

    #[test]
    fn mark_never_moves_backwards() {
        let (db, clock, _, bob, conv) = setup();
        clock.set(5_000);
        assert_eq!(db.mark_read(conv, bob).unwrap(), 5_000);
        clock.set(4_000);
        assert_eq!(db.mark_read(conv, bob).unwrap(), 5_000);
        assert_eq!(db.last_read(conv, bob).unwrap(), Some(5_000));
    }

    #[test]
    fn deleted_messages_still_count_as_unread() {
        let (db, _, alice, bob, conv) = setup();
        let id = db.send_message(conv, alice, "regret").unwrap();
        db.delete_message(id, alice).unwrap();
        assert_eq!(db.unread_count(conv, bob).unwrap(), 1);
    }

    #[test]
    fn outsider_cannot_mark_read() {
        let (db, _, _, _, conv) = setup();
        let eve = db.upsert_user("idp|eve", "Eve", "", None).unwrap();
        let err = db.mark_read(conv, eve).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
    }
}
