//! Optimistic locking.
//!
//! Every committed change bumps the entity's version in a shared
//! [`VersionTable`]. Each store unit of work remembers the version it saw
//! when it loaded an entity; prepare rejects modified or removed entities
//! whose version has moved since, and commit repeats the check under the
//! table lock so two units of work that both passed prepare cannot both
//! commit.
//!
//! Only units of work sharing the table are detected. Writers that bypass
//! it are invisible.

use crate::entity::{EntityId, EntityReference, EntityStatus};
use crate::error::{ConflictPhase, CoreError, CoreResult};
use crate::spi::{
    EntityStore, LockOutcome, StateChange, StateCommitter, StateRollback, StateStream,
    StoreContext, StoreQuery, StoreUnitOfWork, SubmitResult,
};
use crate::state::CompositeState;
use entimap_codec::Document;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// Entity versions shared by optimistic units of work.
///
/// Clones share the same table. Entities never committed through the
/// table are at version 0.
#[derive(Debug, Clone, Default)]
pub struct VersionTable {
    inner: Arc<Mutex<HashMap<EntityId, u64>>>,
}

impl VersionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<VersionTable> = OnceLock::new();
        GLOBAL.get_or_init(VersionTable::new).clone()
    }

    /// Current version of an entity.
    pub fn version(&self, id: &EntityId) -> u64 {
        self.inner.lock().get(id).copied().unwrap_or(0)
    }

    /// Number of versioned entities.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if nothing has been committed through the table.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn snapshot(&self) -> HashMap<EntityId, u64> {
        self.inner.lock().clone()
    }
}

fn stale(table: &HashMap<EntityId, u64>, expected: &[(EntityReference, u64)]) -> Vec<EntityReference> {
    expected
        .iter()
        .filter(|(reference, version)| table.get(&reference.id).copied().unwrap_or(0) != *version)
        .map(|(reference, _)| reference.clone())
        .collect()
}

/// Store decorator adding optimistic conflict detection.
pub struct OptimisticLockingStore {
    inner: Arc<dyn EntityStore>,
    versions: VersionTable,
}

impl OptimisticLockingStore {
    /// Wraps `inner`, versioning through `versions`.
    pub fn new(inner: Arc<dyn EntityStore>, versions: VersionTable) -> Self {
        Self { inner, versions }
    }

    /// The version table in use.
    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }
}

impl EntityStore for OptimisticLockingStore {
    fn init(&self, context: &StoreContext) -> CoreResult<()> {
        self.inner.init(context)
    }

    fn create_unit_of_work(&self) -> CoreResult<Box<dyn StoreUnitOfWork>> {
        Ok(Box::new(OptimisticUnitOfWork {
            inner: self.inner.create_unit_of_work()?,
            versions: self.versions.clone(),
            observed: Arc::new(Mutex::new(HashMap::new())),
            loaded: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    fn state_id(&self, raw: &Document) -> CoreResult<EntityId> {
        self.inner.state_id(raw)
    }

    fn close(&self) -> CoreResult<()> {
        self.inner.close()
    }
}

type LoadedVersions = Arc<Mutex<HashMap<EntityId, u64>>>;

/// Per unit of work: `observed` holds the version of every state handed
/// out, `loaded` the version behind the state each entity actually holds.
/// A version moves from the first map to the second when the engine binds
/// the state.
struct OptimisticUnitOfWork {
    inner: Box<dyn StoreUnitOfWork>,
    versions: VersionTable,
    observed: LoadedVersions,
    loaded: LoadedVersions,
}

impl OptimisticUnitOfWork {
    fn expected_version(&self, id: &EntityId) -> u64 {
        self.loaded.lock().get(id).copied().unwrap_or(0)
    }

    fn observe(&self, id: &EntityId, version: u64) {
        self.observed.lock().insert(id.clone(), version);
    }
}

impl StoreUnitOfWork for OptimisticUnitOfWork {
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>> {
        // Version first: a commit racing the load then shows up as a conflict.
        let version = self.versions.version(id);
        let state = self.inner.load_entity_state(id, entity_type)?;
        if state.is_some() {
            self.observe(id, version);
        }
        Ok(state)
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
        let version = self.versions.version(state.id());
        self.observe(state.id(), version);
        Ok(state)
    }

    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream> {
        let before = self.versions.snapshot();
        let stream = self.inner.execute_query(query)?;
        let observed = Arc::clone(&self.observed);
        Ok(Box::new(stream.map(move |item| {
            if let Ok((id, _)) = &item {
                let version = before.get(id).copied().unwrap_or(0);
                observed.lock().insert(id.clone(), version);
            }
            item
        })))
    }

    fn state_bound(&mut self, id: &EntityId) {
        if let Some(version) = self.observed.lock().remove(id) {
            self.loaded.lock().insert(id.clone(), version);
        }
        self.inner.state_bound(id);
    }

    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>> {
        let expected: Vec<(EntityReference, u64)> = changes
            .iter()
            .filter(|change| change.status != EntityStatus::Created)
            .map(|change| (change.reference(), self.expected_version(change.id())))
            .collect();

        let conflicts = stale(&self.versions.inner.lock(), &expected);
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "optimistic check failed at prepare");
            return Err(CoreError::concurrent_modification(
                ConflictPhase::Prepare,
                conflicts,
            ));
        }

        let committer = self.inner.prepare(changes)?;
        Ok(Box::new(OptimisticCommitter {
            inner: committer,
            versions: self.versions.clone(),
            loaded: Arc::clone(&self.loaded),
            expected,
            changed: changes
                .iter()
                .map(|change| (change.id().clone(), change.status))
                .collect(),
        }))
    }

    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>> {
        {
            let table = self.versions.inner.lock();
            let mut loaded = self.loaded.lock();
            for target in targets.iter() {
                let id = target.state.id();
                match table.get(id) {
                    Some(version) => {
                        loaded.insert(id.clone(), *version);
                    }
                    None => {
                        loaded.remove(id);
                    }
                }
            }
        }
        let vanished = self.inner.rollback(targets)?;
        let mut loaded = self.loaded.lock();
        for id in &vanished {
            loaded.remove(id);
        }
        Ok(vanished)
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
        self.inner.before_modify(id, entity_type)
    }

    fn close(&mut self) {
        self.observed.lock().clear();
        self.loaded.lock().clear();
        self.inner.close();
    }
}

struct OptimisticCommitter {
    inner: Box<dyn StateCommitter>,
    versions: VersionTable,
    loaded: LoadedVersions,
    expected: Vec<(EntityReference, u64)>,
    changed: Vec<(EntityId, EntityStatus)>,
}

impl StateCommitter for OptimisticCommitter {
    fn commit(self: Box<Self>) -> CoreResult<SubmitResult> {
        let OptimisticCommitter {
            inner,
            versions,
            loaded,
            expected,
            changed,
        } = *self;

        let mut table = versions.inner.lock();
        let conflicts = stale(&table, &expected);
        if !conflicts.is_empty() {
            drop(table);
            inner.cancel();
            error!(
                conflicts = ?conflicts,
                "entities changed between prepare and commit"
            );
            return Err(CoreError::concurrent_modification(
                ConflictPhase::Commit,
                conflicts,
            ));
        }

        let result = inner.commit()?;
        let mut loaded = loaded.lock();
        for (id, status) in changed {
            let version = table.entry(id.clone()).or_insert(0);
            *version += 1;
            if status == EntityStatus::Removed {
                loaded.remove(&id);
            } else {
                loaded.insert(id, *version);
            }
        }
        Ok(result)
    }

    fn cancel(self: Box<Self>) {
        self.inner.cancel();
    }
}
