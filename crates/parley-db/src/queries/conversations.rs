use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use parley_types::models::{Conversation, ConversationSummary, MessageSummary};

use super::messages::query_last_message;
use super::read_state::query_unread_count;
use super::users::query_users;
use super::{participant_ids, require_user};
use crate::models::uuid_at;
use crate::{Database, StoreError, StoreResult};

/// Minimum membership of a group conversation, creator included.
pub const MIN_GROUP_MEMBERS: usize = 3;

/// Order-independent key for the (at most one) direct conversation between two users.
fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

impl Database {
    // -- Conversation registry --

    /// Return the direct conversation between `user_a` and `user_b`, creating
    /// it if none exists. Returns `(id, created)`.
    ///
    /// The insert is guarded by the UNIQUE `direct_key`, so callers racing on
    /// first contact all converge on the same row.
    pub fn get_or_create_direct_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> StoreResult<(Uuid, bool)> {
        if user_a == user_b {
            return Err(StoreError::Validation(
                "a direct conversation needs two distinct users".into(),
            ));
        }

        let key = direct_key(user_a, user_b);
        let now = self.now_ms();
        let new_id = Uuid::new_v4();

        let (id, created) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            require_user(&tx, user_a)?;
            require_user(&tx, user_b)?;

            let inserted = tx.execute(
                "INSERT INTO conversations (id, is_group, group_name, direct_key, last_activity)
                 VALUES (?1, 0, NULL, ?2, ?3)
                 ON CONFLICT(direct_key) DO NOTHING",
                rusqlite::params![new_id.to_string(), key, now],
            )?;

            if inserted == 1 {
                insert_members(&tx, new_id, &[user_a, user_b])?;
            }

            let id = tx.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                [&key],
                |row| uuid_at(row, 0),
            )?;
            tx.commit()?;
            Ok((id, inserted == 1))
        })?;

        if created {
            info!("Created direct conversation {} for {} and {}", id, user_a, user_b);
        }
        Ok((id, created))
    }

    /// Create a named group. `participant_ids` must list every member,
    /// creator included; duplicates are collapsed before counting.
    pub fn create_group_conversation(&self, participant_ids: &[Uuid], name: &str) -> StoreResult<Uuid> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("group name must not be empty".into()));
        }

        let mut members: Vec<Uuid> = Vec::with_capacity(participant_ids.len());
        for id in participant_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }
        if members.len() < MIN_GROUP_MEMBERS {
            return Err(StoreError::Validation(format!(
                "a group needs at least {} members, got {}",
                MIN_GROUP_MEMBERS,
                members.len()
            )));
        }

        let id = Uuid::new_v4();
        let now = self.now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for member in &members {
                require_user(&tx, *member)?;
            }
            tx.execute(
                "INSERT INTO conversations (id, is_group, group_name, direct_key, last_activity)
                 VALUES (?1, 1, ?2, NULL, ?3)",
                rusqlite::params![id.to_string(), name, now],
            )?;
            insert_members(&tx, id, &members)?;
            tx.commit()?;
            Ok(())
        })?;

        info!("Created group conversation {} ({}) with {} members", id, name, members.len());
        Ok(id)
    }

    pub fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        self.with_read(|conn| query_conversation(conn, id))
    }

    /// All conversations `user_id` belongs to, most recently active first,
    /// each enriched with participants, last message and unread count. The
    /// whole list is read in one transaction, so it is a point-in-time snapshot.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id
                 FROM conversations c
                 JOIN conversation_members cm ON cm.conversation_id = c.id
                 WHERE cm.user_id = ?1
                 ORDER BY c.last_activity DESC, c.id ASC",
            )?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| uuid_at(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut summaries = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(conversation) = query_conversation(conn, id)? else {
                    continue;
                };
                let participants = query_users(conn, &conversation.participant_ids)?;
                let last_message = query_last_message(conn, id)?.map(|m| MessageSummary::from(&m));
                let unread_count = query_unread_count(conn, id, user_id)?;

                summaries.push(ConversationSummary {
                    conversation,
                    participants,
                    last_message,
                    unread_count,
                });
            }
            Ok(summaries)
        })
    }
}

fn insert_members(conn: &Connection, conversation_id: Uuid, members: &[Uuid]) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
    )?;
    for member in members {
        stmt.execute([conversation_id.to_string(), member.to_string()])?;
    }
    Ok(())
}

pub(super) fn query_conversation(conn: &Connection, id: Uuid) -> StoreResult<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT is_group, group_name, last_activity FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((is_group, group_name, last_activity)) = row else {
        return Ok(None);
    };

    Ok(Some(Conversation {
        id,
        participant_ids: participant_ids(conn, id)?,
        is_group,
        group_name,
        last_activity,
    }))
}
