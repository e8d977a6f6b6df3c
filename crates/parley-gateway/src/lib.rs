pub mod connection;
pub mod dispatcher;
pub mod typing;
pub mod views;

use std::sync::Arc;

use tokio::task::JoinError;

use parley_db::{Database, StoreResult};

/// Run a store call on the blocking pool so the async runtime never waits
/// on the connection lock.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<StoreResult<T>, JoinError>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await
}
