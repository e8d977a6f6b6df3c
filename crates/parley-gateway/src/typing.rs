use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::blocking;
use crate::dispatcher::Dispatcher;
use crate::views::EntityKey;

type TypingKey = (Uuid, Uuid);

/// Generation of the armed timer, if any. The lock is held across every
/// store write for its key, so writes for one (conversation, user) land in
/// the order their generations were taken.
type Slot = Arc<AsyncMutex<Option<u64>>>;

/// Server-side stand-in for the client's "stopped typing" debounce: every
/// `true` signal arriving over the gateway arms a timer, and if no newer
/// signal for the same (conversation, user) lands before it fires, the
/// record is flipped to `false`.
#[derive(Clone)]
pub struct TypingDebouncer {
    dispatcher: Dispatcher,
    debounce: Duration,
    /// Every armed slot is also held by its timer task.
    slots: Arc<Mutex<HashMap<TypingKey, Slot>>>,
    next_generation: Arc<AtomicU64>,
}

impl TypingDebouncer {
    pub fn new(dispatcher: Dispatcher, debounce: Duration) -> Self {
        Self {
            dispatcher,
            debounce,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<TypingKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: TypingKey) -> Slot {
        self.lock_slots().entry(key).or_default().clone()
    }

    /// Drop the slot once nothing but the map refers to it. Clones are only
    /// taken under the map lock, so the count cannot grow underneath us.
    fn prune(&self, key: TypingKey) {
        let mut slots = self.lock_slots();
        if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&key);
        }
    }

    /// Store a typing signal, notify subscribers, and (re)arm the debounce.
    pub async fn signal(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> anyhow::Result<()> {
        let key = (conversation_id, user_id);
        let slot = self.slot(key);

        let mut armed = slot.lock().await;
        // Supersede any armed timer before the write lands
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        *armed = is_typing.then_some(generation);

        let written = self.write(conversation_id, user_id, is_typing).await;
        if written.is_err() {
            *armed = None;
        }
        drop(armed);

        if written.is_ok() && is_typing {
            self.arm(key, slot, generation);
        } else {
            drop(slot);
            self.prune(key);
        }
        written
    }

    fn arm(&self, key: TypingKey, slot: Slot, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            {
                let mut armed = slot.lock().await;
                if *armed == Some(generation) {
                    *armed = None;
                    let (conversation_id, user_id) = key;
                    trace!("Typing debounce elapsed for {} in {}", user_id, conversation_id);
                    if let Err(e) = this.write(conversation_id, user_id, false).await {
                        warn!("Failed to clear typing for {} in {}: {}", user_id, conversation_id, e);
                    }
                }
            }
            drop(slot);
            this.prune(key);
        });
    }

    /// Flip every still-armed typing flag of `user_id` to false. Used when
    /// the user's connection goes away mid-typing.
    pub async fn clear_user(&self, user_id: Uuid) {
        let slots: Vec<(TypingKey, Slot)> = self
            .lock_slots()
            .iter()
            .filter(|((_, u), _)| *u == user_id)
            .map(|(key, slot)| (*key, slot.clone()))
            .collect();

        for (key, slot) in slots {
            {
                let mut armed = slot.lock().await;
                if armed.take().is_some() {
                    let (conversation_id, user_id) = key;
                    if let Err(e) = self.write(conversation_id, user_id, false).await {
                        warn!("Failed to clear typing for {} in {}: {}", user_id, conversation_id, e);
                    }
                }
            }
            drop(slot);
            self.prune(key);
        }
    }

    async fn write(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> anyhow::Result<()> {
        blocking(self.dispatcher.db(), move |db| db.set_typing(conversation_id, user_id, is_typing)).await??;
        self.dispatcher.invalidate([EntityKey::Typing(conversation_id)]);
        Ok(())
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.lock_slots().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::Database;

    fn setup(debounce_ms: u64) -> (TypingDebouncer, Arc<Database>, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.upsert_user("idp|alice", "Alice", "", None).unwrap();
        let bob = db.upsert_user("idp|bob", "Bob", "", None).unwrap();
        let (conv, _) = db.get_or_create_direct_conversation(alice, bob).unwrap();
        let db = Arc::new(db);
        let debouncer = TypingDebouncer::new(Dispatcher::new(db.clone()), Duration::from_millis(debounce_ms));
        (debouncer, db, alice, bob, conv)
    }

    #[tokio::test]
    async fn typing_is_cleared_after_debounce() {
        let (debouncer, db, alice, bob, conv) = setup(100);
        debouncer.signal(conv, alice, true).await.unwrap();
        assert_eq!(db.list_typing_users(conv, Some(bob)).unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!db.get_typing_state(conv, alice).unwrap().unwrap().is_typing);
        assert_eq!(debouncer.slot_count(), 0);
    }

    #[tokio::test]
    async fn newer_signal_rearms_the_debounce() {
        let (debouncer, db, alice, _, conv) = setup(300);
        debouncer.signal(conv, alice, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.signal(conv, alice, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // first timer fired but was superseded
        assert!(db.get_typing_state(conv, alice).unwrap().unwrap().is_typing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn keystroke_at_the_debounce_edge_is_never_wiped() {
        let (debouncer, db, alice, _, conv) = setup(40);

        let mut wiped = 0;
        for i in 0..60u64 {
            debouncer.signal(conv, alice, true).await.unwrap();
            // land the second keystroke right around the first timer
            tokio::time::sleep(Duration::from_millis(38 + i % 5)).await;
            debouncer.signal(conv, alice, true).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            if !db.get_typing_state(conv, alice).unwrap().unwrap().is_typing {
                wiped += 1;
            }
        }
        assert_eq!(wiped, 0);
    }

    #[tokio::test]
    async fn explicit_false_disarms_the_timer() {
        let (debouncer, db, alice, _, conv) = setup(50);
        debouncer.signal(conv, alice, true).await.unwrap();
        debouncer.signal(conv, alice, false).await.unwrap();
        let stopped = db.get_typing_state(conv, alice).unwrap().unwrap();

        // the disarmed timer must not write again
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(db.get_typing_state(conv, alice).unwrap().unwrap(), stopped);
        assert_eq!(debouncer.slot_count(), 0);
    }

    #[tokio::test]
    async fn rejected_signal_leaves_nothing_armed() {
        let (debouncer, db, alice, _, conv) = setup(60_000);
        let eve = db.upsert_user("idp|eve", "Eve", "", None).unwrap();
        assert!(debouncer.signal(conv, eve, true).await.is_err());
        assert_eq!(debouncer.slot_count(), 0);
        debouncer.signal(conv, alice, true).await.unwrap();
        assert_eq!(debouncer.slot_count(), 1);
    }

    #[tokio::test]
    async fn clear_user_resets_pending_flags() {
        let (debouncer, db, alice, _, conv) = setup(60_000);
        debouncer.signal(conv, alice, true).await.unwrap();
        debouncer.clear_user(alice).await;
        assert!(!db.get_typing_state(conv, alice).unwrap().unwrap().is_typing);
    }
}
