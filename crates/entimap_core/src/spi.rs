//! Store service provider interface.
//!
//! A store adapter implements [`EntityStore`] once per backend and hands
//! out one [`StoreUnitOfWork`] per engine unit of work. Submitting is two
//! phase: [`StoreUnitOfWork::prepare`] validates and stages the changes and
//! returns a [`StateCommitter`], which either commits or cancels them.
//! Locking strategies are decorators over these traits.

use crate::entity::{EntityId, EntityReference, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::query::Expression;
use crate::schema::{EntityDescriptor, SchemaRegistry};
use crate::state::CompositeState;
use entimap_codec::Document;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lazy sequence of query results.
pub type StateStream = Box<dyn Iterator<Item = CoreResult<(EntityId, Box<dyn CompositeState>)>> + Send>;

/// What a store sees of the repository at init.
#[derive(Debug, Clone)]
pub struct StoreContext {
    registry: Arc<SchemaRegistry>,
    repository: String,
}

impl StoreContext {
    pub(crate) fn new(registry: Arc<SchemaRegistry>, repository: impl Into<String>) -> Self {
        Self {
            registry,
            repository: repository.into(),
        }
    }

    /// Name of the repository being built.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Registered types.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Descriptor of a concrete type.
    pub fn descriptor(&self, entity_type: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.registry.descriptor(entity_type)
    }
}

/// A store backend.
pub trait EntityStore: Send + Sync {
    /// One-time setup, called when the repository is built.
    fn init(&self, context: &StoreContext) -> CoreResult<()> {
        let _ = context;
        Ok(())
    }

    /// Opens a store-side unit of work.
    fn create_unit_of_work(&self) -> CoreResult<Box<dyn StoreUnitOfWork>>;

    /// Identifier of a raw state obtained outside the engine.
    fn state_id(&self, raw: &Document) -> CoreResult<EntityId>;

    /// Releases backend resources.
    fn close(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Outcome of a lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Acquired without waiting.
    Uncontended,
    /// Acquired after waiting; the caller must reload the entity.
    Contended,
}

/// A change handed to [`StoreUnitOfWork::prepare`].
#[derive(Debug, Clone, Copy)]
pub struct StateChange<'a> {
    /// `Created`, `Modified` or `Removed`.
    pub status: EntityStatus,
    /// Current state of the entity.
    pub state: &'a dyn CompositeState,
}

impl StateChange<'_> {
    /// Entity id.
    pub fn id(&self) -> &EntityId {
        self.state.id()
    }

    /// (type, id) of the entity.
    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.state.type_name(), self.state.id().clone())
    }
}

/// An entity whose state should be reloaded from the store.
#[derive(Debug)]
pub struct StateRollback<'a> {
    /// Status before the rollback.
    pub status: EntityStatus,
    /// State to overwrite in place.
    pub state: &'a mut dyn CompositeState,
}

/// Ids affected by a submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitResult {
    /// Entities inserted.
    pub created: BTreeSet<EntityId>,
    /// Entities updated.
    pub modified: BTreeSet<EntityId>,
    /// Entities deleted.
    pub removed: BTreeSet<EntityId>,
}

impl SubmitResult {
    /// Records one change.
    pub fn record(&mut self, status: EntityStatus, id: EntityId) {
        match status {
            EntityStatus::Created => {
                self.created.insert(id);
            }
            EntityStatus::Removed => {
                self.removed.insert(id);
            }
            _ => {
                self.modified.insert(id);
            }
        }
    }

    /// Total number of affected ids.
    pub fn len(&self) -> usize {
        self.created.len() + self.modified.len() + self.removed.len()
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A query as the store sees it.
#[derive(Debug, Clone)]
pub struct StoreQuery {
    /// Type name the caller asked for, possibly abstract.
    pub entity_type: String,
    /// Concrete types assignable to `entity_type`.
    pub concrete_types: Vec<String>,
    /// Predicate, for stores that can pre-filter. The engine re-evaluates
    /// every result, so stores may ignore it.
    pub expression: Option<Expression>,
}

impl StoreQuery {
    /// True if `type_name` is one of the queried concrete types.
    pub fn matches_type(&self, type_name: &str) -> bool {
        self.concrete_types.iter().any(|t| t == type_name)
    }
}

/// Staged changes awaiting commit.
pub trait StateCommitter: Send {
    /// Applies the staged changes.
    fn commit(self: Box<Self>) -> CoreResult<SubmitResult>;

    /// Drops the staged changes.
    fn cancel(self: Box<Self>);
}

/// Store side of one unit of work.
pub trait StoreUnitOfWork: Send {
    /// Loads an entity state, `None` if the store has no such entity.
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>>;

    /// Allocates a state for a new entity. The store picks an id when
    /// none is given.
    fn new_entity_state(
        &mut self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>>;

    /// Wraps a raw state obtained outside the engine.
    fn adopt_entity_state(
        &mut self,
        raw: Document,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>>;

    /// Streams every stored entity of the queried types.
    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream>;

    /// Called when the engine backs an entity with a state returned by
    /// [`load_entity_state`](Self::load_entity_state),
    /// [`adopt_entity_state`](Self::adopt_entity_state) or a query stream.
    /// States the engine drops in favour of an instance it already holds
    /// are never reported.
    fn state_bound(&mut self, id: &EntityId) {
        let _ = id;
    }

    /// Validates and stages changes. At most one prepared batch may be
    /// outstanding; a failed prepare leaves nothing staged.
    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>>;

    /// Prepares and commits in one step.
    fn submit(&mut self, changes: &[StateChange<'_>]) -> CoreResult<SubmitResult> {
        self.prepare(changes)?.commit()
    }

    /// Reloads the given states in place. Returns the ids the store no
    /// longer has.
    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>>;

    /// True if [`clone_entity_state`](Self::clone_entity_state) and
    /// [`reincorporate_entity_state`](Self::reincorporate_entity_state)
    /// are implemented.
    fn supports_cloning(&self) -> bool {
        false
    }

    /// Independent copy of a state, for nested units of work.
    fn clone_entity_state(&self, state: &dyn CompositeState) -> CoreResult<Box<dyn CompositeState>> {
        let _ = state;
        Err(CoreError::unsupported("entity state cloning"))
    }

    /// Copies a cloned state back into its original.
    fn reincorporate_entity_state(
        &self,
        target: &mut dyn CompositeState,
        source: &dyn CompositeState,
    ) -> CoreResult<()> {
        let _ = (target, source);
        Err(CoreError::unsupported("entity state reincorporation"))
    }

    /// Called before the first write to a loaded entity.
    fn before_modify(&mut self, id: &EntityId, entity_type: &str) -> CoreResult<LockOutcome> {
        let _ = (id, entity_type);
        Ok(LockOutcome::Uncontended)
    }

    /// Releases everything this unit of work holds.
    fn close(&mut self) {}
}
