use std::sync::Arc;

use parley_db::{Database, StoreResult};
use parley_gateway::dispatcher::Dispatcher;

use crate::error::ApiResult;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(dispatcher: Dispatcher) -> AppState {
        Arc::new(Self {
            db: dispatcher.db().clone(),
            dispatcher,
        })
    }

    /// Run a store call off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(parley_gateway::blocking(&self.db, f).await??)
    }
}
