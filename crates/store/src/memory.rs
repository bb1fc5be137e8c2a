use std::collections::HashMap;
use std::sync::{Arc, RwLock as SnapshotLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use slotline_core::domain::session::{Session, SessionId};
use slotline_core::scheduling::{Clock, SystemClock};

use crate::{read_committed, Committed, SessionLease, SessionStore, Slot, StoreError};

type SharedSlot = Arc<Mutex<Slot>>;

#[derive(Clone)]
struct Entry {
    slot: SharedSlot,
    committed: Committed,
}

impl Entry {
    fn new(session: Session) -> Self {
        let committed = Arc::new(SnapshotLock::new(session));
        let slot = Arc::new(Mutex::new(Slot { committed: Arc::clone(&committed), evicted: false }));
        Self { slot, committed }
    }
}

/// Sessions keyed by id, each behind its own mutex. The map lock is never
/// held while waiting on a session lock, and reads go to the committed
/// snapshot instead of the lock.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), clock }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn existing(&self, id: &SessionId) -> Option<Entry> {
        self.sessions.read().await.get(id.as_str()).cloned()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: &SessionId, phone: &str) -> Result<Session, StoreError> {
        let lease = self.acquire(id, phone).await?;
        Ok(Session::clone(&lease))
    }

    async fn acquire(&self, id: &SessionId, phone: &str) -> Result<SessionLease, StoreError> {
        loop {
            let (slot, created) = {
                let mut sessions = self.sessions.write().await;
                match sessions.get(id.as_str()) {
                    Some(entry) => (Arc::clone(&entry.slot), false),
                    None => {
                        let entry = Entry::new(Session::new(id.clone(), phone, self.clock.now()));
                        let slot = Arc::clone(&entry.slot);
                        sessions.insert(id.0.clone(), entry);
                        (slot, true)
                    }
                }
            };

            let guard = slot.lock_owned().await;
            if guard.evicted {
                // Lost a race with eviction; the next pass recreates the record.
                continue;
            }
            return Ok(SessionLease::new(guard, created));
        }
    }

    async fn lock_existing(&self, id: &SessionId) -> Result<SessionLease, StoreError> {
        let entry = self.existing(id).await.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let guard = entry.slot.lock_owned().await;
        if guard.evicted {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(SessionLease::new(guard, false))
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.existing(id).await.map(|entry| read_committed(&entry.committed)))
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .map(|entry| read_committed(&entry.committed))
            .collect();
        sessions.sort_by(|left, right| left.created_at().cmp(&right.created_at()));
        Ok(sessions)
    }

    async fn evict_idle_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionId>, StoreError> {
        let candidates: Vec<(String, SharedSlot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.slot)))
            .collect();

        let mut evicted = Vec::new();
        for (key, slot) in candidates {
            let mut guard = slot.lock().await;
            let session = read_committed(&guard.committed);
            if guard.evicted || !session.is_idle_since(cutoff) {
                continue;
            }

            {
                let mut sessions = self.sessions.write().await;
                if sessions.get(&key).is_some_and(|current| Arc::ptr_eq(&current.slot, &slot)) {
                    sessions.remove(&key);
                }
            }
            guard.evicted = true;
            evicted.push(session.id().clone());
        }

        Ok(evicted)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
