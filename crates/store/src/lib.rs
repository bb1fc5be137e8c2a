use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use slotline_core::domain::session::{Session, SessionId};

pub mod eviction;
pub mod memory;

pub use eviction::spawn_eviction;
pub use memory::InMemorySessionStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("session `{0}` was not found")]
    NotFound(SessionId),
}

/// Keyed, concurrency-safe storage of conversation state.
///
/// Every mutation goes through a [`SessionLease`], which holds that session's
/// exclusive lock until it is committed or dropped.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns a snapshot of the session, creating it in `New` if absent.
    async fn get_or_create(&self, id: &SessionId, phone: &str) -> Result<Session, StoreError>;

    /// Takes the session's lock, creating the record first if needed.
    async fn acquire(&self, id: &SessionId, phone: &str) -> Result<SessionLease, StoreError>;

    /// Takes the lock of a session that must already exist.
    async fn lock_existing(&self, id: &SessionId) -> Result<SessionLease, StoreError>;

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    async fn list(&self) -> Result<Vec<Session>, StoreError>;

    /// Removes every session whose last activity precedes `cutoff`, taking
    /// each session's lock before removing it.
    async fn evict_idle_before(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<SessionId>, StoreError>;

    fn now(&self) -> DateTime<Utc>;

    /// A `ttl` reaching past the earliest representable instant evicts
    /// nothing.
    async fn evict_idle_older_than(&self, ttl: Duration) -> Result<Vec<SessionId>, StoreError> {
        let cutoff = self.now().checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_idle_before(cutoff).await
    }
}

/// Last committed version of a session. Readers take it without waiting on
/// the session lock, so listing never blocks behind a running lease.
pub(crate) type Committed = Arc<RwLock<Session>>;

pub(crate) fn read_committed(committed: &Committed) -> Session {
    match committed.read() {
        Ok(session) => session.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Locked slot inside a store. `evicted` lets a waiter that raced with
/// eviction notice the record is gone.
#[derive(Debug)]
pub struct Slot {
    pub(crate) committed: Committed,
    pub(crate) evicted: bool,
}

/// Exclusive access to one session. Changes are made to a working copy and
/// only become visible on [`SessionLease::commit`]; dropping the lease
/// discards them.
pub struct SessionLease {
    guard: OwnedMutexGuard<Slot>,
    working: Session,
    created: bool,
}

impl SessionLease {
    pub(crate) fn new(guard: OwnedMutexGuard<Slot>, created: bool) -> Self {
        let working = read_committed(&guard.committed);
        Self { guard, working, created }
    }

    /// True when this acquisition created the record.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn commit(self) -> Session {
        match self.guard.committed.write() {
            Ok(mut committed) => *committed = self.working.clone(),
            Err(poisoned) => *poisoned.into_inner() = self.working.clone(),
        }
        self.working
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.working
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.working
    }
}

/// Runs `f` with exclusive access to an existing session and commits the
/// result.
pub async fn with_lock<S, F, R>(store: &S, id: &SessionId, f: F) -> Result<R, StoreError>
where
    S: SessionStore + ?Sized,
    F: FnOnce(&mut Session) -> R + Send,
{
    let mut lease = store.lock_existing(id).await?;
    let result = f(&mut *lease);
    lease.commit();
    Ok(result)
}
