use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::models::User;

use crate::models::{USER_COLUMNS, user_at, uuid_at};
use crate::{Database, StoreError, StoreResult};

impl Database {
    // -- Identity directory --

    /// Create the user on first sign-in, otherwise refresh their profile.
    /// Either way the user ends up online with `last_seen = now`.
    pub fn upsert_user(
        &self,
        identity_key: &str,
        name: &str,
        email: &str,
        image_url: Option<&str>,
    ) -> StoreResult<Uuid> {
        if identity_key.trim().is_empty() {
            return Err(StoreError::Validation("identity key must not be empty".into()));
        }

        let now = self.now_ms();
        let new_id = Uuid::new_v4();

        self.with_conn(|conn| {
            let id = conn.query_row(
                "INSERT INTO users (id, identity_key, name, email, image_url, is_online, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                 ON CONFLICT(identity_key) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    image_url = excluded.image_url,
                    is_online = 1,
                    last_seen = excluded.last_seen
                 RETURNING id",
                rusqlite::params![new_id.to_string(), identity_key, name, email, image_url, now],
                |row| uuid_at(row, 0),
            )?;
            Ok(id)
        })
    }

    /// Flip the presence flag. Unknown identities are ignored because
    /// disconnect signals can arrive after teardown; returns the user's id
    /// when a record was touched.
    pub fn set_online_status(&self, identity_key: &str, online: bool) -> StoreResult<Option<Uuid>> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE identity_key = ?3 RETURNING id",
                    rusqlite::params![online, now, identity_key],
                    |row| uuid_at(row, 0),
                )
                .optional()?;
            Ok(id)
        })
    }

    pub fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.with_read(|conn| query_user(conn, "u.id", &id.to_string()))
    }

    pub fn get_user_by_identity(&self, identity_key: &str) -> StoreResult<Option<User>> {
        self.with_read(|conn| query_user(conn, "u.identity_key", identity_key))
    }

    /// Case-insensitive substring match on display name, never returning the
    /// caller. An empty query lists everyone else.
    pub fn search_users(&self, query: &str, excluding_identity: &str) -> StoreResult<Vec<User>> {
        let needle = query.to_lowercase();
        let users = self.with_read(|conn| {
            let sql = format!("SELECT {} FROM users u WHERE u.identity_key != ?1", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([excluding_identity], |row| user_at(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(users
            .into_iter()
            .filter(|u| u.name.to_lowercase().contains(&needle))
            .collect())
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE {} = ?1", USER_COLUMNS, column);
    let user = conn.query_row(&sql, [value], |row| user_at(row, 0)).optional()?;
    Ok(user)
}

/// Resolve a batch of user ids, silently skipping unknown ones.
pub(super) fn query_users(conn: &Connection, ids: &[Uuid]) -> StoreResult<Vec<User>> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = query_user(conn, "u.id", &id.to_string())? {
            users.push(user);
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{Database, ManualClock, StoreError};

    fn db_at(start: i64) -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let db = Database::open_in_memory().unwrap().with_clock(clock.clone());
        (db, clock)
    }

    #[test]
    fn upsert_creates_then_updates_same_record() {
        let (db, clock) = db_at(1_000);
        let id = db.upsert_user("idp|alice", "Alice", "a@example.com", None).unwrap();

        db.set_online_status("idp|alice", false).unwrap();
        clock.set(5_000);
        let again = db
            .upsert_user("idp|alice", "Alice Liddell", "alice@example.com", Some("img/a.png"))
            .unwrap();
        assert_eq!(id, again);

        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.name, "Alice Liddell");
        assert_eq!(user.image_url.as_deref(), Some("img/a.png"));
        assert!(user.is_online);
        assert_eq!(user.last_seen, 5_000);
    }

    #[test]
    fn upsert_rejects_blank_identity() {
        let (db, _) = db_at(0);
        let err = db.upsert_user("  ", "Nobody", "", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn set_online_status_is_noop_for_unknown_user() {
        let (db, _) = db_at(0);
        assert_eq!(db.set_online_status("idp|ghost", true).unwrap(), None);
    }

    #[test]
    fn set_online_status_updates_flag_and_last_seen() {
        let (db, clock) = db_at(100);
        let id = db.upsert_user("idp|bob", "Bob", "b@example.com", None).unwrap();
        clock.set(900);
        assert_eq!(db.set_online_status("idp|bob", false).unwrap(), Some(id));

        let user = db.get_user_by_identity("idp|bob").unwrap().unwrap();
        assert!(!user.is_online);
        assert_eq!(user.last_seen, 900);
    }

    #[test]
    fn search_is_case_insensitive_and_excludes_caller() {
        let (db, _) = db_at(0);
        db.upsert_user("idp|alice", "Alice", "", None).unwrap();
        db.upsert_user("idp|malik", "Malik", "", None).unwrap();
        db.upsert_user("idp|bob", "Bob", "", None).unwrap();

        let mut names: Vec<String> = db
            .search_users("AL", "idp|bob")
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Alice", "Malik"]);

        let hits = db.search_users("ali", "idp|alice").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Malik");

        assert_eq!(db.search_users("", "idp|alice").unwrap().len(), 2);
    }

    #[test]
    fn search_query_is_matched_verbatim() {
        let (db, _) = db_at(0);
        db.upsert_user("idp|alice", "Alice", "", None).unwrap();
        db.upsert_user("idp|al", "Big Al", "", None).unwrap();

        let hits = db.search_users(" al", "").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Big Al");
    }
}
