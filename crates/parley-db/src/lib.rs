pub mod clock;
pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use rusqlite::Connection;
use tracing::info;

use parley_types::models::Millis;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};

/// Typing records older than this are ignored by readers.
pub const DEFAULT_TYPING_WINDOW_MS: Millis = 3_000;

/// Read connections opened next to the writer for file-backed stores.
pub const READ_POOL_SIZE: usize = 4;

/// The single logical authority for users, conversations, messages and the
/// ephemeral typing/read state hanging off them.
///
/// Writes are serialized on one connection, each for one statement or one
/// short transaction. Reads run on a pool of WAL snapshot connections and
/// never wait for the writer. In-memory stores have no pool; their reads
/// share the write connection.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    clock: Arc<dyn Clock>,
    typing_window_ms: Millis,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let mut db = Self::from_connection(conn)?;

        // Opened after migrations so readers never see a half-built schema
        for _ in 0..READ_POOL_SIZE {
            let reader = Connection::open(path)?;
            reader.pragma_update(None, "query_only", true)?;
            db.readers.push(Mutex::new(reader));
        }

        info!("Database opened at {} with {} readers", path.display(), db.readers.len());
        Ok(db)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            clock: Arc::new(SystemClock),
            typing_window_ms: DEFAULT_TYPING_WINDOW_MS,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_typing_window(mut self, window_ms: Millis) -> Self {
        self.typing_window_ms = window_ms;
        self
    }

    pub fn now_ms(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn typing_window_ms(&self) -> Millis {
        self.typing_window_ms
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Run a read-only closure inside one read transaction, so every
    /// statement in it sees the same committed snapshot.
    pub fn with_read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        if self.readers.is_empty() {
            return self.with_conn(f);
        }

        let conn = self.checkout_reader()?;
        let tx = conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// First idle reader starting from a rotating offset, else wait on the
    /// reader at that offset.
    fn checkout_reader(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        for i in 0..self.readers.len() {
            match self.readers[(start + i) % self.readers.len()].try_lock() {
                Ok(conn) => return Ok(conn),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::LockPoisoned),
            }
        }
        self.readers[start].lock().map_err(|_| StoreError::LockPoisoned)
    }
}
