use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayEvent, LiveView, ViewQuery};

use crate::views::{self, EntityKey, ViewSnapshot};

/// Subscriptions are scoped to the connection that created them, so two
/// clients may pick the same subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    conn_id: Uuid,
    subscription_id: Uuid,
}

struct Subscription {
    key: SubscriptionKey,
    query: ViewQuery,
    sink: mpsc::UnboundedSender<GatewayEvent>,
    state: Mutex<RecomputeState>,
}

#[derive(Default)]
struct RecomputeState {
    /// A worker task owns this subscription's recompute loop
    running: bool,
    /// Another pass is needed
    dirty: bool,
    /// Removed from the registry; in-flight results are dropped
    cancelled: bool,
    /// Keys the last delivered value was computed from
    deps: HashSet<EntityKey>,
    /// Keys written while a pass was in flight
    touched: HashSet<EntityKey>,
    refresh_generation: u64,
    last_view: Option<LiveView>,
}

impl Subscription {
    fn lock_state(&self) -> MutexGuard<'_, RecomputeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps every client's live views current.
///
/// Writers call [`Dispatcher::invalidate`] with the keys they touched. Every
/// subscription whose last computed value read one of those keys is
/// recomputed from a fresh store snapshot and pushed to its connection.
/// Per subscription at most one recompute runs at a time, so values are
/// delivered in the order they were computed.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,

    /// Dependency index: entity key -> subscriptions that read it.
    /// Lock order: `index`, then `subscriptions`, then per-subscription state.
    index: RwLock<HashMap<EntityKey, HashSet<SubscriptionKey>>>,

    subscriptions: RwLock<HashMap<SubscriptionKey, Arc<Subscription>>>,

    /// Subscriptions with a recompute worker alive
    in_flight: Mutex<HashSet<SubscriptionKey>>,

    /// Open gateway connections per user
    connections: RwLock<HashMap<Uuid, usize>>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                index: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Register a live view for a connection and schedule its first value.
    /// Re-using a subscription id replaces the previous view.
    pub async fn subscribe(
        &self,
        conn_id: Uuid,
        subscription_id: Uuid,
        query: ViewQuery,
        sink: mpsc::UnboundedSender<GatewayEvent>,
    ) {
        let key = SubscriptionKey { conn_id, subscription_id };
        let sub = Arc::new(Subscription {
            key,
            query,
            sink,
            state: Mutex::new(RecomputeState::default()),
        });

        // Held across registration so no invalidation can slip between
        // insertion and the worker being marked in flight.
        let mut index = self.inner.index.write().await;
        let replaced = self.inner.subscriptions.write().await.insert(key, sub.clone());
        if let Some(old) = replaced {
            self.inner.cancel(&mut index, &old);
        }
        self.inner.schedule(sub);
        drop(index);

        debug!("Connection {} subscribed {}", conn_id, subscription_id);
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, subscription_id: Uuid) {
        let key = SubscriptionKey { conn_id, subscription_id };
        let mut index = self.inner.index.write().await;
        let removed = self.inner.subscriptions.write().await.remove(&key);
        if let Some(sub) = removed {
            self.inner.cancel(&mut index, &sub);
            debug!("Connection {} unsubscribed {}", conn_id, subscription_id);
        }
    }

    /// Drop every subscription owned by a connection.
    pub async fn drop_connection(&self, conn_id: Uuid) {
        let mut index = self.inner.index.write().await;
        let removed: Vec<Arc<Subscription>> = {
            let mut subs = self.inner.subscriptions.write().await;
            let keys: Vec<SubscriptionKey> = subs.keys().filter(|k| k.conn_id == conn_id).copied().collect();
            keys.iter().filter_map(|k| subs.remove(k)).collect()
        };
        for sub in &removed {
            self.inner.cancel(&mut index, sub);
        }
        debug!("Connection {} dropped {} subscriptions", conn_id, removed.len());
    }

    /// Report that the given entities changed. Delivery is asynchronous.
    pub fn invalidate<I>(&self, keys: I)
    where
        I: IntoIterator<Item = EntityKey>,
    {
        let keys: Vec<EntityKey> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.fan_out(keys).await });
    }

    /// Number of live subscriptions across all connections.
    pub async fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().await.len()
    }

    /// Count a new gateway connection for `user_id`. Returns true when it is
    /// the user's only connection.
    pub async fn user_connected(&self, user_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        let count = connections.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns true when the user's last connection just closed.
    pub async fn user_disconnected(&self, user_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                connections.remove(&user_id);
                true
            }
            None => false,
        }
    }
}

impl DispatcherInner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<SubscriptionKey>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with the index write lock held.
    fn cancel(&self, index: &mut HashMap<EntityKey, HashSet<SubscriptionKey>>, sub: &Subscription) {
        let deps = {
            let mut state = sub.lock_state();
            state.cancelled = true;
            std::mem::take(&mut state.deps)
        };
        unindex(index, sub.key, &deps);
    }

    /// Mark the subscription dirty and start a worker unless one is running.
    fn schedule(self: &Arc<Self>, sub: Arc<Subscription>) {
        let start = {
            let mut state = sub.lock_state();
            if state.cancelled {
                return;
            }
            state.dirty = true;
            if state.running {
                false
            } else {
                state.running = true;
                self.lock_in_flight().insert(sub.key);
                true
            }
        };

        if start {
            let inner = self.clone();
            tokio::spawn(async move { inner.run_recompute(sub).await });
        }
    }

    async fn fan_out(self: &Arc<Self>, keys: Vec<EntityKey>) {
        let index = self.index.read().await;
        let subs = self.subscriptions.read().await;

        let mut hit: HashSet<SubscriptionKey> = HashSet::new();
        for key in &keys {
            if let Some(ids) = index.get(key) {
                hit.extend(ids.iter().copied());
            }
        }

        // A pass that already read its snapshot but has not re-indexed yet
        // is invisible to the index. Record the keys so it can check them
        // against its fresh dependency set.
        let in_flight: Vec<SubscriptionKey> = self.lock_in_flight().iter().copied().collect();
        for key in in_flight {
            if let Some(sub) = subs.get(&key) {
                let mut state = sub.lock_state();
                if state.running {
                    state.touched.extend(keys.iter().copied());
                }
            }
        }

        for key in hit {
            if let Some(sub) = subs.get(&key) {
                self.schedule(sub.clone());
            }
        }
    }

    async fn run_recompute(self: Arc<Self>, sub: Arc<Subscription>) {
        loop {
            {
                let mut state = sub.lock_state();
                if state.cancelled || !state.dirty {
                    state.running = false;
                    self.lock_in_flight().remove(&sub.key);
                    return;
                }
                state.dirty = false;
                state.touched.clear();
            }

            let db = self.db.clone();
            let query = sub.query.clone();
            match tokio::task::spawn_blocking(move || views::compute(&db, &query)).await {
                Ok(Ok(snapshot)) => self.deliver(&sub, snapshot).await,
                Ok(Err(e)) => {
                    warn!("Recompute of {:?} failed: {}", sub.query, e);
                    let state = sub.lock_state();
                    if !state.cancelled {
                        let _ = sub.sink.send(GatewayEvent::SubscriptionError {
                            subscription_id: sub.key.subscription_id,
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }
    }

    async fn deliver(self: &Arc<Self>, sub: &Arc<Subscription>, snapshot: ViewSnapshot) {
        let ViewSnapshot { view, deps, refresh_at } = snapshot;

        let generation = {
            let mut index = self.index.write().await;
            let mut state = sub.lock_state();
            if state.cancelled {
                return;
            }

            let old = std::mem::replace(&mut state.deps, deps);
            unindex(&mut index, sub.key, &old);
            for key in &state.deps {
                index.entry(*key).or_default().insert(sub.key);
            }

            if state.touched.iter().any(|k| state.deps.contains(k)) {
                state.dirty = true;
            }

            state.refresh_generation += 1;

            // Identical consecutive values are not re-sent. The send happens
            // under the state lock so a cancel cannot land between the check
            // and the delivery.
            if state.last_view.as_ref() != Some(&view) {
                state.last_view = Some(view.clone());
                let _ = sub.sink.send(GatewayEvent::ViewUpdate {
                    subscription_id: sub.key.subscription_id,
                    view,
                });
            }
            state.refresh_generation
        };

        if let Some(at) = refresh_at {
            self.arm_refresh(sub.clone(), at, generation);
        }
    }

    /// Recompute the subscription once `at` is reached, unless a newer pass
    /// has superseded this one by then.
    fn arm_refresh(self: &Arc<Self>, sub: Arc<Subscription>, at: i64, generation: u64) {
        let delay = (at - self.db.now_ms()).max(0) as u64;
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let current = {
                let state = sub.lock_state();
                !state.cancelled && state.refresh_generation == generation
            };
            if current {
                inner.schedule(sub);
            }
        });
    }
}

fn unindex(
    index: &mut HashMap<EntityKey, HashSet<SubscriptionKey>>,
    key: SubscriptionKey,
    deps: &HashSet<EntityKey>,
) {
    for dep in deps {
        if let Some(set) = index.get_mut(dep) {
            set.remove(&key);
            if set.is_empty() {
                index.remove(dep);
            }
        }
    }
}
