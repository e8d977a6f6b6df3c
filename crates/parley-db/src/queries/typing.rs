use rusqlite::OptionalExtension;
use uuid::Uuid;

use parley_types::models::User;

use super::require_member;
use crate::models::{TypingRow, Typist, USER_COLUMNS, user_at};
use crate::{Database, StoreResult};

impl Database {
    // -- Typing tracker --

    /// Upsert the (conversation, user) typing record with `now` as its
    /// timestamp. Records expire on read; nothing sweeps them.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> StoreResult<()> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            require_member(conn, conversation_id, user_id)?;
            conn.execute(
                "INSERT INTO typing_states (conversation_id, user_id, is_typing, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                    is_typing = excluded.is_typing,
                    updated_at = excluded.updated_at",
                rusqlite::params![conversation_id.to_string(), user_id.to_string(), is_typing, now],
            )?;
            Ok(())
        })
    }

    pub fn get_typing_state(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<Option<TypingRow>> {
        self.with_read(|conn| {
            let row = conn
                .query_row(
                    "SELECT is_typing, updated_at FROM typing_states
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id.to_string(), user_id.to_string()],
                    |row| {
                        Ok(TypingRow {
                            conversation_id,
                            user_id,
                            is_typing: row.get(0)?,
                            updated_at: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Users flagged as typing whose last signal is younger than the
    /// staleness window, oldest signal first. `excluding` is left out.
    pub fn active_typists(&self, conversation_id: Uuid, excluding: Option<Uuid>) -> StoreResult<Vec<Typist>> {
        let cutoff = self.now_ms() - self.typing_window_ms();
        let excluded = excluding.map(|id| id.to_string()).unwrap_or_default();

        self.with_read(|conn| {
            let sql = format!(
                "SELECT {}, t.updated_at
                 FROM typing_states t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.conversation_id = ?1
                   AND t.is_typing = 1
                   AND t.updated_at > ?2
                   AND t.user_id != ?3
                 ORDER BY t.updated_at ASC, u.id ASC",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let typists = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), cutoff, excluded],
                    |row| {
                        Ok(Typist {
                            user: user_at(row, 0)?,
                            updated_at: row.get(7)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(typists)
        })
    }

    pub fn list_typing_users(&self, conversation_id: Uuid, excluding: Option<Uuid>) -> StoreResult<Vec<User>> {
        Ok(self
            .active_typists(conversation_id, excluding)?
            .into_iter()
            .map(|t| t.user)
            .collect())
    }
}
