use rusqlite::Connection;
use tracing::info;

use crate::StoreResult;

pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            identity_key    TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            email           TEXT NOT NULL,
            image_url       TEXT,
            is_online       INTEGER NOT NULL DEFAULT 0,
            last_seen       INTEGER NOT NULL
        );

        -- direct_key is the sorted user pair for 1:1 conversations and NULL
        -- for groups; the UNIQUE constraint is what makes get-or-create race free.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            is_group        INTEGER NOT NULL,
            group_name      TEXT,
            direct_key      TEXT UNIQUE,
            last_activity   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON conversation_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            emoji           TEXT NOT NULL,
            user_id         TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (message_id, emoji, user_id)
        );

        CREATE TABLE IF NOT EXISTS typing_states (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            is_typing       INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS read_receipts (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            last_read       INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
