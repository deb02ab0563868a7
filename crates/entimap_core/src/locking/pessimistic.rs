//! Pessimistic locking.
//!
//! Entities are locked by (type, id) in a shared [`LockTable`]. A store unit
//! of work owns one [`LockToken`]; read locks are taken when it loads or
//! queries an entity and a write lock before the first modification. Every
//! lock held by the token is released when the unit of work closes or is
//! dropped.
//!
//! Waiting is a condition-variable wait bounded by the configured timeout.
//! A lock that had to be waited for reports [`LockOutcome::Contended`] and
//! the engine reloads the entity, since the previous holder may have
//! committed in the meantime.
//!
//! Upgrading a read lock while another reader holds the same entity waits
//! for that reader; two readers upgrading at once wait on each other until
//! one of them times out.

use crate::entity::{EntityId, EntityReference};
use crate::error::{CoreError, CoreResult};
use crate::locking::LockPolicy;
use crate::spi::{
    EntityStore, LockOutcome, StateChange, StateCommitter, StateRollback, StateStream,
    StoreContext, StoreQuery, StoreUnitOfWork,
};
use crate::state::CompositeState;
use entimap_codec::Document;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Capability identifying the holder of entity locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockToken(u64);

impl LockToken {
    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock:{}", self.0)
    }
}

/// Kind of access requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

#[derive(Debug, Default)]
struct LockEntry {
    readers: HashSet<LockToken>,
    writer: Option<LockToken>,
}

impl LockEntry {
    fn grantable(&self, token: LockToken, mode: LockMode, policy: LockPolicy) -> bool {
        match mode {
            LockMode::Read => {
                if self.readers.contains(&token) || self.writer == Some(token) {
                    return true;
                }
                if self.writer.is_some() {
                    return false;
                }
                match policy {
                    LockPolicy::OneReader => self.readers.is_empty(),
                    LockPolicy::MultipleReaders => true,
                }
            }
            LockMode::Write => {
                self.writer.map_or(true, |writer| writer == token)
                    && self.readers.iter().all(|reader| *reader == token)
            }
        }
    }

    fn grant(&mut self, token: LockToken, mode: LockMode) {
        match mode {
            LockMode::Read => {
                self.readers.insert(token);
            }
            LockMode::Write => self.writer = Some(token),
        }
    }

    fn release(&mut self, token: LockToken) -> bool {
        let was_reader = self.readers.remove(&token);
        let was_writer = self.writer == Some(token);
        if was_writer {
            self.writer = None;
        }
        was_reader || was_writer
    }
}

#[derive(Debug, Default)]
struct LockTableInner {
    entries: Mutex<HashMap<EntityReference, LockEntry>>,
    released: Condvar,
    next_token: AtomicU64,
    waiters: AtomicUsize,
}

/// Entity locks shared by pessimistic units of work.
///
/// Clones share the same table. Entries stay in the table once created,
/// even when nobody holds them.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    inner: Arc<LockTableInner>,
}

impl LockTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<LockTable> = OnceLock::new();
        GLOBAL.get_or_init(LockTable::new).clone()
    }

    /// Issues a new token.
    pub fn next_token(&self) -> LockToken {
        LockToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Acquires a lock for `token`, waiting while it is not grantable.
    ///
    /// # Errors
    ///
    /// `LockTimeout` if `timeout` elapses first. `None` waits forever.
    pub fn acquire(
        &self,
        entity: &EntityReference,
        token: LockToken,
        mode: LockMode,
        policy: LockPolicy,
        timeout: Option<Duration>,
    ) -> CoreResult<LockOutcome> {
        let bound = timeout.map(|limit| (limit, Instant::now() + limit));
        let mut entries = self.inner.entries.lock();
        let mut contended = false;
        let mut expired = false;
        loop {
            let entry = entries.entry(entity.clone()).or_default();
            if entry.grantable(token, mode, policy) {
                entry.grant(token, mode);
                trace!(%entity, %token, ?mode, contended, "lock acquired");
                if !contended {
                    return Ok(LockOutcome::Uncontended);
                }
                self.inner.waiters.fetch_sub(1, Ordering::Relaxed);
                return Ok(LockOutcome::Contended);
            }
            if let (true, Some((limit, _))) = (expired, bound) {
                self.inner.waiters.fetch_sub(1, Ordering::Relaxed);
                return Err(CoreError::LockTimeout {
                    entity: entity.clone(),
                    timeout: limit,
                });
            }
            if !contended {
                contended = true;
                self.inner.waiters.fetch_add(1, Ordering::Relaxed);
                warn!(%entity, %token, ?mode, "waiting for entity lock");
            }
            match bound {
                Some((_, deadline)) => {
                    expired = self
                        .inner
                        .released
                        .wait_until(&mut entries, deadline)
                        .timed_out();
                }
                None => self.inner.released.wait(&mut entries),
            }
        }
    }

    /// Releases every lock held by `token`. Returns how many entries it
    /// held.
    pub fn release_all(&self, token: LockToken) -> usize {
        let mut entries = self.inner.entries.lock();
        let released = entries
            .values_mut()
            .map(|entry| entry.release(token))
            .filter(|released| *released)
            .count();
        drop(entries);
        if released > 0 {
            self.inner.released.notify_all();
            trace!(%token, released, "locks released");
        }
        released
    }

    /// Number of threads currently waiting for a lock.
    pub fn waiters(&self) -> usize {
        self.inner.waiters.load(Ordering::Relaxed)
    }

    /// Number of entries ever locked.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// True if nothing was ever locked.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// True if some token holds the write lock.
    pub fn is_write_locked(&self, entity: &EntityReference) -> bool {
        self.inner
            .entries
            .lock()
            .get(entity)
            .is_some_and(|entry| entry.writer.is_some())
    }

    /// Number of tokens holding a read lock.
    pub fn reader_count(&self, entity: &EntityReference) -> usize {
        self.inner
            .entries
            .lock()
            .get(entity)
            .map_or(0, |entry| entry.readers.len())
    }
}

/// Store decorator adding pessimistic entity locks.
pub struct PessimisticLockingStore {
    inner: Arc<dyn EntityStore>,
    locks: LockTable,
    policy: LockPolicy,
    timeout: Option<Duration>,
}

impl PessimisticLockingStore {
    /// Wraps `inner`, locking through `locks`.
    pub fn new(
        inner: Arc<dyn EntityStore>,
        locks: LockTable,
        policy: LockPolicy,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner,
            locks,
            policy,
            timeout,
        }
    }

    /// The lock table in use.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }
}

impl EntityStore for PessimisticLockingStore {
    fn init(&self, context: &StoreContext) -> CoreResult<()> {
        self.inner.init(context)
    }

    fn create_unit_of_work(&self) -> CoreResult<Box<dyn StoreUnitOfWork>> {
        Ok(Box::new(PessimisticUnitOfWork {
            inner: self.inner.create_unit_of_work()?,
            locks: self.locks.clone(),
            token: self.locks.next_token(),
            policy: self.policy,
            timeout: self.timeout,
            closed: false,
        }))
    }

    fn state_id(&self, raw: &Document) -> CoreResult<EntityId> {
        self.inner.state_id(raw)
    }

    fn close(&self) -> CoreResult<()> {
        self.inner.close()
    }
}

struct PessimisticUnitOfWork {
    inner: Box<dyn StoreUnitOfWork>,
    locks: LockTable,
    token: LockToken,
    policy: LockPolicy,
    timeout: Option<Duration>,
    closed: bool,
}

impl PessimisticUnitOfWork {
    fn lock(&self, entity: &EntityReference, mode: LockMode) -> CoreResult<LockOutcome> {
        self.locks
            .acquire(entity, self.token, mode, self.policy, self.timeout)
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.locks.release_all(self.token);
        }
    }
}

impl StoreUnitOfWork for PessimisticUnitOfWork {
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>> {
        let Some(state) = self.inner.load_entity_state(id, entity_type)? else {
            return Ok(None);
        };
        let entity = EntityReference::new(state.type_name(), id.clone());
        match self.lock(&entity, LockMode::Read)? {
            LockOutcome::Uncontended => Ok(Some(state)),
            LockOutcome::Contended => self.inner.load_entity_state(id, entity_type),
        }
    }

    fn new_entity_state(
        &mut self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.inner.new_entity_state(id, entity_type)
    }

    fn adopt_entity_state(
        &mut self,
        raw: Document,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        let state = self.inner.adopt_entity_state(raw, entity_type)?;
        let entity = EntityReference::new(state.type_name(), state.id().clone());
        self.lock(&entity, LockMode::Read)?;
        Ok(state)
    }

    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream> {
        let mut locked: Vec<CoreResult<(EntityId, Box<dyn CompositeState>)>> = Vec::new();
        for item in self.inner.execute_query(query)? {
            let (id, state) = item?;
            let entity = EntityReference::new(state.type_name(), id.clone());
            match self.lock(&entity, LockMode::Read)? {
                LockOutcome::Uncontended => locked.push(Ok((id, state))),
                LockOutcome::Contended => {
                    if let Some(fresh) = self.inner.load_entity_state(&id, state.type_name())? {
                        locked.push(Ok((id, fresh)));
                    }
                }
            }
        }
        Ok(Box::new(locked.into_iter()))
    }

    fn state_bound(&mut self, id: &EntityId) {
        self.inner.state_bound(id);
    }

    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>> {
        self.inner.prepare(changes)
    }

    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>> {
        self.inner.rollback(targets)
    }

    fn supports_cloning(&self) -> bool {
        self.inner.supports_cloning()
    }

    fn clone_entity_state(&self, state: &dyn CompositeState) -> CoreResult<Box<dyn CompositeState>> {
        self.inner.clone_entity_state(state)
    }

    fn reincorporate_entity_state(
        &self,
        target: &mut dyn CompositeState,
        source: &dyn CompositeState,
    ) -> CoreResult<()> {
        self.inner.reincorporate_entity_state(target, source)
    }

    fn before_modify(&mut self, id: &EntityId, entity_type: &str) -> CoreResult<LockOutcome> {
        let entity = EntityReference::new(entity_type, id.clone());
        let outcome = self.lock(&entity, LockMode::Write)?;
        let inner = self.inner.before_modify(id, entity_type)?;
        Ok(if inner == LockOutcome::Contended {
            LockOutcome::Contended
        } else {
            outcome
        })
    }

    fn close(&mut self) {
        self.release();
        self.inner.close();
    }
}

impl Drop for PessimisticUnitOfWork {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn person(id: &str) -> EntityReference {
        EntityReference::new("Person", EntityId::from(id))
    }

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn multiple_readers_share() {
        let table = LockTable::new();
        let (a, b) = (table.next_token(), table.next_token());
        let p = person("p1");

        let policy = LockPolicy::MultipleReaders;
        assert_eq!(
            table.acquire(&p, a, LockMode::Read, policy, SHORT).unwrap(),
            LockOutcome::Uncontended
        );
        assert_eq!(
            table.acquire(&p, b, LockMode::Read, policy, SHORT).unwrap(),
            LockOutcome::Uncontended
        );
        assert_eq!(table.reader_count(&p), 2);
    }

    #[test]
    fn one_reader_excludes_second_reader() {
        let table = LockTable::new();
        let (a, b) = (table.next_token(), table.next_token());
        let p = person("p1");

        let policy = LockPolicy::OneReader;
        table.acquire(&p, a, LockMode::Read, policy, SHORT).unwrap();
        let err = table
            .acquire(&p, b, LockMode::Read, policy, SHORT)
            .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert_eq!(
            table.acquire(&p, a, LockMode::Read, policy, SHORT).unwrap(),
            LockOutcome::Uncontended
        );
    }

    #[test]
    fn writer_must_be_sole_reader() {
        let table = LockTable::new();
        let (a, b) = (table.next_token(), table.next_token());
        let p = person("p1");
        let policy = LockPolicy::MultipleReaders;

        table.acquire(&p, a, LockMode::Read, policy, SHORT).unwrap();
        table.acquire(&p, a, LockMode::Write, policy, SHORT).unwrap();
        assert!(table.is_write_locked(&p));
        assert!(table.acquire(&p, b, LockMode::Read, policy, SHORT).is_err());

        table.release_all(a);
        table.acquire(&p, b, LockMode::Read, policy, SHORT).unwrap();
        assert!(table.acquire(&p, a, LockMode::Write, policy, SHORT).is_err());
    }

    #[test]
    fn waiter_wakes_on_release_and_reports_contention() {
        let table = LockTable::new();
        let (a, b) = (table.next_token(), table.next_token());
        let p = person("p1");
        let policy = LockPolicy::MultipleReaders;
        table.acquire(&p, a, LockMode::Write, policy, None).unwrap();

        let waiter = {
            let table = table.clone();
            let p = p.clone();
            thread::spawn(move || {
                table.acquire(&p, b, LockMode::Write, policy, Some(Duration::from_secs(10)))
            })
        };
        while table.waiters() == 0 {
            thread::yield_now();
        }
        table.release_all(a);

        assert_eq!(waiter.join().unwrap().unwrap(), LockOutcome::Contended);
        assert!(table.is_write_locked(&p));
    }

    #[test]
    fn entries_persist_after_release() {
        let table = LockTable::new();
        let policy = LockPolicy::MultipleReaders;
        for i in 0..50 {
            let token = table.next_token();
            let p = person(&format!("p{}", i % 10));
            table.acquire(&p, token, LockMode::Write, policy, SHORT).unwrap();
            assert_eq!(table.release_all(token), 1);
        }
        assert_eq!(table.len(), 10);
        assert!(!table.is_write_locked(&person("p0")));
    }

    #[test]
    fn tokens_are_unique() {
        let table = LockTable::new();
        let a = table.next_token();
        let b = table.next_token();
        assert_ne!(a, b);
        assert_eq!(b.as_u64(), a.as_u64() + 1);
        assert_eq!(a.to_string(), format!("lock:{}", a.as_u64()));
    }
}
