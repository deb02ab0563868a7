//! In-memory store adapter.
//!
//! Committed states are kept as CBOR-encoded documents in a shared map, so
//! every unit of work decodes its own private copy. This is the reference
//! adapter used by the test suite and by applications that do not need
//! persistence.

use crate::entity::{EntityId, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::spi::{
    EntityStore, StateChange, StateCommitter, StateRollback, StateStream, StoreContext,
    StoreQuery, StoreUnitOfWork, SubmitResult,
};
use crate::state::CompositeState;
use entimap_codec::{from_cbor, to_cbor, Document, Value};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Field holding the entity id in raw documents passed to
/// [`UnitOfWork::entity_for_state`](crate::UnitOfWork::entity_for_state).
pub const IDENTITY_FIELD: &str = "identity";

/// Composite state backed by a document.
#[derive(Debug, Clone)]
pub struct MemoryState {
    id: EntityId,
    type_name: String,
    document: Document,
}

impl MemoryState {
    /// Creates a state.
    pub fn new(id: EntityId, type_name: impl Into<String>, document: Document) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            document,
        }
    }

    /// Property values.
    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl CompositeState for MemoryState {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn load(&self, property: &str) -> Value {
        self.document.get_or_null(property)
    }

    fn store(&mut self, property: &str, value: Value) {
        self.document.set(property, value);
    }

    fn snapshot(&self) -> Document {
        self.document.clone()
    }

    fn restore(&mut self, document: Document) {
        self.document = document;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    type_name: String,
    bytes: Vec<u8>,
}

impl StoredRecord {
    fn encode(state: &dyn CompositeState) -> CoreResult<Self> {
        Ok(Self {
            type_name: state.type_name().to_string(),
            bytes: to_cbor(&state.snapshot())?,
        })
    }

    fn decode(&self, id: &EntityId) -> CoreResult<MemoryState> {
        let document: Document = from_cbor(&self.bytes)?;
        Ok(MemoryState::new(id.clone(), self.type_name.clone(), document))
    }
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    records: RwLock<BTreeMap<EntityId, StoredRecord>>,
    repository: RwLock<Option<String>>,
}

/// Store adapter holding committed states in process memory.
///
/// Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a raw document for
    /// [`UnitOfWork::entity_for_state`](crate::UnitOfWork::entity_for_state).
    pub fn raw_state(id: &EntityId, properties: Document) -> Document {
        properties.with(IDENTITY_FIELD, id)
    }

    /// Writes a record directly, bypassing any unit of work.
    pub fn insert(&self, id: EntityId, entity_type: &str, properties: &Document) -> CoreResult<()> {
        let record = StoredRecord {
            type_name: entity_type.to_string(),
            bytes: to_cbor(properties)?,
        };
        self.inner.records.write().insert(id, record);
        Ok(())
    }

    /// Number of committed entities.
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// True if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// True if an entity with this id is committed.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.inner.records.read().contains_key(id)
    }

    /// Committed properties of an entity.
    pub fn document(&self, id: &EntityId) -> CoreResult<Option<Document>> {
        match self.inner.records.read().get(id) {
            Some(record) => Ok(Some(from_cbor(&record.bytes)?)),
            None => Ok(None),
        }
    }

    /// Repository name passed at init.
    pub fn repository(&self) -> Option<String> {
        self.inner.repository.read().clone()
    }
}

impl EntityStore for MemoryStore {
    fn init(&self, context: &StoreContext) -> CoreResult<()> {
        debug!(repository = context.repository(), "memory store initialised");
        *self.inner.repository.write() = Some(context.repository().to_string());
        Ok(())
    }

    fn create_unit_of_work(&self) -> CoreResult<Box<dyn StoreUnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: Arc::clone(&self.inner),
            preparing: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn state_id(&self, raw: &Document) -> CoreResult<EntityId> {
        raw.get(IDENTITY_FIELD)
            .and_then(EntityId::from_value)
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("raw state has no {IDENTITY_FIELD} field"))
            })
    }
}

struct MemoryUnitOfWork {
    store: Arc<MemoryStoreInner>,
    preparing: Arc<AtomicBool>,
}

impl StoreUnitOfWork for MemoryUnitOfWork {
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        _entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>> {
        let records = self.store.records.read();
        match records.get(id) {
            Some(record) => {
                trace!(%id, "memory store load");
                Ok(Some(Box::new(record.decode(id)?)))
            }
            None => Ok(None),
        }
    }

    fn new_entity_state(
        &mut self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        let id = id.cloned().unwrap_or_default();
        Ok(Box::new(MemoryState::new(id, entity_type, Document::new())))
    }

    fn adopt_entity_state(
        &mut self,
        mut raw: Document,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        let id = raw
            .remove(IDENTITY_FIELD)
            .as_ref()
            .and_then(EntityId::from_value)
            .ok_or_else(|| {
                CoreError::invalid_operation(format!("raw state has no {IDENTITY_FIELD} field"))
            })?;
        Ok(Box::new(MemoryState::new(id, entity_type, raw)))
    }

    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream> {
        let matching: Vec<(EntityId, StoredRecord)> = self
            .store
            .records
            .read()
            .iter()
            .filter(|(_, record)| query.matches_type(&record.type_name))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        trace!(entity_type = %query.entity_type, hits = matching.len(), "memory store query");

        Ok(Box::new(matching.into_iter().map(
            |(id, record)| -> CoreResult<(EntityId, Box<dyn CompositeState>)> {
                let state: Box<dyn CompositeState> = Box::new(record.decode(&id)?);
                Ok((id, state))
            },
        )))
    }

    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>> {
        if self.preparing.swap(true, Ordering::AcqRel) {
            return Err(CoreError::invalid_operation(
                "a prepared store transaction is already outstanding",
            ));
        }

        let staged = self.stage(changes);
        match staged {
            Ok(writes) => Ok(Box::new(MemoryCommitter {
                store: Arc::clone(&self.store),
                writes,
                preparing: Arc::clone(&self.preparing),
                finished: false,
            })),
            Err(e) => {
                self.preparing.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>> {
        let records = self.store.records.read();
        let mut vanished = Vec::new();
        for target in targets.iter_mut() {
            let id = target.state.id().clone();
            match records.get(&id) {
                Some(record) => {
                    let document: Document = from_cbor(&record.bytes)?;
                    target.state.restore(document);
                }
                None => vanished.push(id),
            }
        }
        Ok(vanished)
    }

    fn supports_cloning(&self) -> bool {
        true
    }

    fn clone_entity_state(&self, state: &dyn CompositeState) -> CoreResult<Box<dyn CompositeState>> {
        Ok(Box::new(MemoryState::new(
            state.id().clone(),
            state.type_name(),
            state.snapshot(),
        )))
    }

    fn reincorporate_entity_state(
        &self,
        target: &mut dyn CompositeState,
        source: &dyn CompositeState,
    ) -> CoreResult<()> {
        target.restore(source.snapshot());
        Ok(())
    }
}

impl MemoryUnitOfWork {
    fn stage(&self, changes: &[StateChange<'_>]) -> CoreResult<Vec<StagedWrite>> {
        let records = self.store.records.read();
        let mut writes = Vec::with_capacity(changes.len());
        for change in changes {
            let id = change.id().clone();
            let record = match change.status {
                EntityStatus::Created if records.contains_key(&id) => {
                    return Err(CoreError::DuplicateId { id });
                }
                EntityStatus::Removed => None,
                _ => Some(StoredRecord::encode(change.state)?),
            };
            writes.push(StagedWrite {
                status: change.status,
                id,
                record,
            });
        }
        Ok(writes)
    }
}

struct StagedWrite {
    status: EntityStatus,
    id: EntityId,
    record: Option<StoredRecord>,
}

struct MemoryCommitter {
    store: Arc<MemoryStoreInner>,
    writes: Vec<StagedWrite>,
    preparing: Arc<AtomicBool>,
    finished: bool,
}

impl StateCommitter for MemoryCommitter {
    fn commit(mut self: Box<Self>) -> CoreResult<SubmitResult> {
        let store = Arc::clone(&self.store);
        let mut records = store.records.write();
        for write in &self.writes {
            if write.status == EntityStatus::Created && records.contains_key(&write.id) {
                return Err(CoreError::DuplicateId {
                    id: write.id.clone(),
                });
            }
        }

        let mut result = SubmitResult::default();
        for write in std::mem::take(&mut self.writes) {
            match write.record {
                Some(record) => {
                    records.insert(write.id.clone(), record);
                }
                None => {
                    records.remove(&write.id);
                }
            }
            result.record(write.status, write.id);
        }
        drop(records);

        self.finished = true;
        self.preparing.store(false, Ordering::Release);
        debug!(
            created = result.created.len(),
            modified = result.modified.len(),
            removed = result.removed.len(),
            "memory store commit"
        );
        Ok(result)
    }

    fn cancel(mut self: Box<Self>) {
        self.finished = true;
        self.preparing.store(false, Ordering::Release);
    }
}

impl Drop for MemoryCommitter {
    fn drop(&mut self) {
        if !self.finished {
            self.preparing.store(false, Ordering::Release);
        }
    }
}
