//! Unit-of-work operations: lookup, creation, removal, queries, submit,
//! discard, reload and refresh.

use super::nested::ParentStoreUnitOfWork;
use super::{LifecycleEvent, LifecycleHook, UnitOfWork};
use crate::entity::{Entity, EntityId, EntityStatus, InstanceBuilder};
use crate::error::{CoreError, CoreResult};
use crate::query::{Expression, Query};
use crate::schema::SchemaRegistry;
use crate::spi::{LockOutcome, StateChange, StateCommitter, StateRollback, SubmitResult};
use crate::state::CompositeState;
use entimap_codec::Document;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

impl UnitOfWork {
    /// Creates an entity of a concrete type with status `Created`.
    ///
    /// The store picks an id when `id` is `None`.
    ///
    /// # Errors
    ///
    /// `UnknownEntityType` for unregistered or abstract types, `DuplicateId`
    /// if this unit of work already holds an entity with the given id.
    pub fn create_entity(&self, entity_type: &str, id: Option<EntityId>) -> CoreResult<Entity> {
        self.ensure_open()?;
        self.inner.shared.registry.descriptor(entity_type)?;
        if let Some(id) = &id {
            if self.cached(id).is_some() {
                return Err(CoreError::DuplicateId { id: id.clone() });
            }
        }

        let state = self
            .inner
            .store
            .lock()
            .new_entity_state(id.as_ref(), entity_type)?;
        let (entity, inserted) = self.attach(state, EntityStatus::Created)?;
        if !inserted {
            return Err(CoreError::DuplicateId {
                id: entity.id().clone(),
            });
        }
        self.inner
            .modified
            .lock()
            .insert(entity.id().clone(), entity.clone());
        self.inner.shared.stats.record_create();
        trace!(unit_of_work = %self.inner.id, entity = %entity.reference(), "entity created");
        Ok(entity)
    }

    /// Creates an entity and runs `init` on it. If `init` fails the entity
    /// is detached and forgotten, and the error is returned.
    pub fn create_entity_with<F>(
        &self,
        entity_type: &str,
        id: Option<EntityId>,
        init: F,
    ) -> CoreResult<Entity>
    where
        F: FnOnce(&Entity) -> CoreResult<()>,
    {
        let entity = self.create_entity(entity_type, id)?;
        if let Err(e) = init(&entity) {
            self.forget(&entity);
            entity.detach();
            return Err(e);
        }
        Ok(entity)
    }

    /// Looks an entity up by id.
    ///
    /// Returns the cached instance when there is one; otherwise loads it.
    /// `Ok(None)` if the store does not know the id, the entity is marked
    /// removed, or its type is not assignable to `entity_type`.
    pub fn entity(&self, entity_type: &str, id: &EntityId) -> CoreResult<Option<Entity>> {
        self.ensure_open()?;
        let registry = Arc::clone(&self.inner.shared.registry);
        if !registry.is_known(entity_type) {
            return Err(CoreError::unknown_entity_type(entity_type));
        }

        if let Some(entity) = self.cached(id) {
            self.inner.shared.stats.record_cache_hit();
            trace!(unit_of_work = %self.inner.id, %id, "identity cache hit");
            return Ok(visible_as(entity, &registry, entity_type));
        }

        let state = self
            .inner
            .store
            .lock()
            .load_entity_state(id, entity_type)?;
        let Some(state) = state else {
            return Ok(None);
        };
        let (entity, inserted) = self.attach(state, EntityStatus::Loaded)?;
        if inserted {
            self.bind(&entity);
            self.inner.shared.stats.record_load();
        }
        Ok(visible_as(entity, &registry, entity_type))
    }

    /// Binds a raw state obtained outside the engine.
    ///
    /// The store names the entity the state belongs to. An unmodified
    /// cached instance takes over the supplied state. An instance with
    /// pending modifications is returned unchanged when the states agree,
    /// and rejected otherwise.
    pub fn entity_for_state(&self, entity_type: &str, raw: Document) -> CoreResult<Entity> {
        self.ensure_open()?;
        self.inner.shared.registry.descriptor(entity_type)?;
        let id = self.inner.shared.store.state_id(&raw)?;
        let pending = self.inner.modified.lock().get(&id).cloned();
        let state = self
            .inner
            .store
            .lock()
            .adopt_entity_state(raw, entity_type)?;
        if state.id() != &id {
            return Err(CoreError::store(format!(
                "adopted state is {}, the store named it {id}",
                state.id()
            )));
        }

        if let Some(existing) = pending {
            if existing.snapshot()? != state.snapshot() {
                return Err(CoreError::invalid_operation(format!(
                    "{} has pending modifications that differ from the supplied state",
                    existing.reference()
                )));
            }
            return Ok(existing);
        }

        if let Some(existing) = self.cached(&id) {
            existing.replace_state(state);
            self.bind(&existing);
            trace!(unit_of_work = %self.inner.id, entity = %existing.reference(), "state replaced");
            return Ok(existing);
        }

        let (entity, inserted) = self.attach(state, EntityStatus::Loaded)?;
        if inserted {
            self.bind(&entity);
            self.inner.shared.stats.record_load();
        }
        Ok(entity)
    }

    /// Marks an entity for removal at the next submit.
    pub fn remove_entity(&self, entity: &Entity) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_owned(entity)?;
        self.prepare_modification(entity)?;
        if entity.raise_status(EntityStatus::Removed) {
            self.inner.shared.stats.record_remove();
        }
        self.inner
            .modified
            .lock()
            .insert(entity.id().clone(), entity.clone());
        trace!(unit_of_work = %self.inner.id, entity = %entity.reference(), "entity removed");
        Ok(())
    }

    /// Starts a query over `entity_type` and its subtypes.
    pub fn query(&self, entity_type: &str) -> CoreResult<Query> {
        self.ensure_open()?;
        if !self.inner.shared.registry.is_known(entity_type) {
            return Err(CoreError::unknown_entity_type(entity_type));
        }
        Ok(Query::new(self.clone(), entity_type))
    }

    /// Writes every pending change to the store.
    ///
    /// On success every submitted entity is `Loaded` again (removed ones
    /// are evicted) and the modified set is empty. On failure nothing
    /// changes in this unit of work; the caller may retry, reload or
    /// discard.
    pub fn submit(&self) -> CoreResult<SubmitResult> {
        self.ensure_open()?;
        match self.submit_changes() {
            Ok(result) => {
                self.inner.shared.stats.record_submit();
                debug!(
                    unit_of_work = %self.inner.id,
                    created = result.created.len(),
                    modified = result.modified.len(),
                    removed = result.removed.len(),
                    "submit complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.inner.shared.stats.record_submit_failure();
                debug!(unit_of_work = %self.inner.id, error = %e, "submit failed");
                Err(e)
            }
        }
    }

    /// Drops every pending change.
    ///
    /// Entities created in this unit of work are detached, even if removed
    /// since; the rest are reloaded from the store, and evicted if the store
    /// no longer has them.
    pub fn discard(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let pending = self.modified_entities();
        let (created, existing): (Vec<Entity>, Vec<Entity>) = pending
            .into_iter()
            .partition(Entity::is_unsaved);

        let vanished = self.rollback_states(&existing)?;
        for entity in &created {
            self.forget(entity);
            entity.detach();
        }
        for entity in &existing {
            if vanished.contains(entity.id()) {
                self.forget(entity);
                entity.evict();
            } else {
                entity.set_status(EntityStatus::Loaded);
                entity.reset_caches();
            }
        }
        self.clear_modified(created.iter().chain(&existing));

        self.inner.shared.stats.record_discard();
        self.fire(LifecycleEvent::AfterDiscard)?;
        debug!(
            unit_of_work = %self.inner.id,
            detached = created.len(),
            reloaded = existing.len().saturating_sub(vanished.len()),
            evicted = vanished.len(),
            "discard complete"
        );
        Ok(())
    }

    /// Same as [`discard`](Self::discard).
    pub fn reset(&self) -> CoreResult<()> {
        self.discard()
    }

    /// Reloads one entity from the store, dropping its pending changes.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for an entity created in this unit of work.
    pub fn reload(&self, entity: &Entity) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_owned(entity)?;
        let previous = entity.status();
        if entity.is_unsaved() {
            return Err(CoreError::invalid_operation(format!(
                "{} has not been submitted and cannot be reloaded",
                entity.reference()
            )));
        }

        entity.set_status(EntityStatus::Modified);
        let vanished = match self.rollback_states(std::slice::from_ref(entity)) {
            Ok(vanished) => vanished,
            Err(e) => {
                entity.set_status(previous);
                return Err(e);
            }
        };

        self.clear_modified(std::iter::once(entity));
        if vanished.is_empty() {
            entity.set_status(EntityStatus::Loaded);
            entity.reset_caches();
        } else {
            self.forget(entity);
            entity.evict();
        }
        self.inner.shared.stats.record_reload();
        trace!(unit_of_work = %self.inner.id, entity = %entity.reference(), "entity reloaded");
        Ok(())
    }

    /// Reloads every unmodified cached entity. Entities the store no longer
    /// has are evicted; modified entities keep their pending changes.
    pub fn refresh(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let loaded: Vec<Entity> = self
            .cached_entities()
            .into_iter()
            .filter(|entity| entity.status() == EntityStatus::Loaded)
            .collect();

        let vanished = self.rollback_states(&loaded)?;
        for entity in &loaded {
            if vanished.contains(entity.id()) {
                self.forget(entity);
                entity.evict();
            } else {
                entity.reset_caches();
            }
        }
        debug!(
            unit_of_work = %self.inner.id,
            refreshed = loaded.len(),
            evicted = vanished.len(),
            "refresh complete"
        );
        Ok(())
    }

    /// Opens a unit of work nested in this one.
    ///
    /// The nested scope loads copies of this scope's entities; its submit
    /// writes the changes back here instead of to the store.
    ///
    /// # Errors
    ///
    /// `Unsupported` if the store cannot clone entity states.
    pub fn new_unit_of_work(&self) -> CoreResult<UnitOfWork> {
        self.ensure_open()?;
        if !self.inner.store.lock().supports_cloning() {
            return Err(CoreError::unsupported(
                "nested unit of work over a store without state cloning",
            ));
        }
        let store = Box::new(ParentStoreUnitOfWork::new(self.clone()));
        Ok(UnitOfWork::open(
            Arc::clone(&self.inner.shared),
            store,
            Some(self.clone()),
        ))
    }

    /// Runs the store's pre-write hook before the first write to a loaded
    /// entity, reloading it if a lock had to be waited for.
    pub(crate) fn prepare_modification(&self, entity: &Entity) -> CoreResult<()> {
        if entity.status() != EntityStatus::Loaded {
            return Ok(());
        }
        let outcome = self
            .inner
            .store
            .lock()
            .before_modify(entity.id(), entity.type_name())?;
        if outcome == LockOutcome::Contended {
            debug!(entity = %entity.reference(), "lock was contended, reloading");
            self.reload(entity)?;
        }
        Ok(())
    }

    pub(crate) fn mark_modified(&self, entity: &Entity) {
        entity.raise_status(EntityStatus::Modified);
        self.inner
            .modified
            .lock()
            .insert(entity.id().clone(), entity.clone());
    }

    /// Merges stored and pending entities of a type.
    ///
    /// Stored states of entities with pending changes are skipped in favour
    /// of the in-memory instances, and removed entities never appear.
    pub(crate) fn execute_query(
        &self,
        entity_type: &str,
        expression: Option<&Expression>,
    ) -> CoreResult<Vec<Entity>> {
        self.ensure_open()?;
        let registry = Arc::clone(&self.inner.shared.registry);
        let query = crate::spi::StoreQuery {
            entity_type: entity_type.to_string(),
            concrete_types: registry.concrete_types_of(entity_type),
            expression: expression.cloned(),
        };
        let stream = self.inner.store.lock().execute_query(&query)?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for item in stream {
            let (id, state) = item?;
            if self.inner.modified.lock().contains_key(&id) {
                continue;
            }
            let (entity, inserted) = self.attach(state, EntityStatus::Loaded)?;
            if inserted {
                self.bind(&entity);
                self.inner.shared.stats.record_load();
            }
            if !entity.status().is_visible() || !seen.insert(id) {
                continue;
            }
            if matches(expression, &entity)? {
                results.push(entity);
            }
        }

        for entity in self.modified_entities() {
            if !entity.status().is_visible()
                || !registry.is_assignable(entity.type_name(), entity_type)
                || !seen.insert(entity.id().clone())
            {
                continue;
            }
            if matches(expression, &entity)? {
                results.push(entity);
            }
        }

        self.inner.shared.stats.record_query();
        trace!(unit_of_work = %self.inner.id, %entity_type, hits = results.len(), "query executed");
        Ok(results)
    }

    /// Independent copy of an entity's state, made by this scope's store.
    pub(crate) fn clone_state(&self, entity: &Entity) -> CoreResult<Box<dyn CompositeState>> {
        let guard = entity.inner.state.read();
        let state = guard.as_deref().ok_or_else(|| entity.detached())?;
        self.inner.store.lock().clone_entity_state(state)
    }

    /// Overwrites an entity's state from a copy.
    pub(crate) fn reincorporate(&self, entity: &Entity, source: &dyn CompositeState) -> CoreResult<()> {
        let mut guard = entity.inner.state.write();
        let target = guard.as_deref_mut().ok_or_else(|| entity.detached())?;
        self.inner
            .store
            .lock()
            .reincorporate_entity_state(target, source)?;
        drop(guard);
        entity.reset_caches();
        Ok(())
    }

    /// Overwrites `target` from this scope's instance of the same entity.
    /// Returns false if this scope no longer has it.
    pub(crate) fn restore_into(&self, target: &mut dyn CompositeState) -> CoreResult<bool> {
        let Some(entity) = self.entity(target.type_name(), target.id())? else {
            return Ok(false);
        };
        let guard = entity.inner.state.read();
        let source = guard.as_deref().ok_or_else(|| entity.detached())?;
        self.inner
            .store
            .lock()
            .reincorporate_entity_state(target, source)?;
        Ok(true)
    }

    /// Takes over a state created in a nested scope as a new entity here.
    pub(crate) fn adopt_created(&self, state: Box<dyn CompositeState>) -> CoreResult<Entity> {
        self.ensure_open()?;
        let (entity, inserted) = self.attach(state, EntityStatus::Created)?;
        if !inserted {
            return Err(CoreError::DuplicateId {
                id: entity.id().clone(),
            });
        }
        self.inner
            .modified
            .lock()
            .insert(entity.id().clone(), entity.clone());
        self.inner.shared.stats.record_create();
        Ok(entity)
    }

    /// Passes a new-state request through to this scope's store.
    pub(crate) fn new_state(
        &self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.ensure_open()?;
        self.inner.store.lock().new_entity_state(id, entity_type)
    }

    /// Passes an adopt request through to this scope's store.
    pub(crate) fn adopt_state(&self, raw: Document, entity_type: &str) -> CoreResult<Box<dyn CompositeState>> {
        self.ensure_open()?;
        self.inner.store.lock().adopt_entity_state(raw, entity_type)
    }

    pub(crate) fn supports_cloning(&self) -> bool {
        self.inner.store.lock().supports_cloning()
    }

    fn submit_changes(&self) -> CoreResult<SubmitResult> {
        self.fire(LifecycleEvent::BeforePrepare)?;

        let entities: Vec<Entity> = self
            .modified_entities()
            .into_iter()
            .filter(|entity| entity.status().is_modified())
            .collect();
        // Created and removed again: nothing for the store to do.
        let changed: Vec<Entity> = entities
            .iter()
            .filter(|entity| !(entity.status() == EntityStatus::Removed && entity.is_unsaved()))
            .cloned()
            .collect();
        let committer = self.prepare_changes(&changed)?;

        let hooks = self
            .fire(LifecycleEvent::AfterPrepare)
            .and_then(|()| self.fire(LifecycleEvent::BeforeCommit));
        if let Err(e) = hooks {
            committer.cancel();
            return Err(e);
        }

        let result = committer.commit()?;
        self.complete_submit(&entities);
        self.fire(LifecycleEvent::AfterCommit)?;
        Ok(result)
    }

    fn prepare_changes(&self, entities: &[Entity]) -> CoreResult<Box<dyn StateCommitter>> {
        let guards: Vec<_> = entities
            .iter()
            .map(|entity| entity.inner.state.read())
            .collect();
        let mut changes = Vec::with_capacity(entities.len());
        for (entity, guard) in entities.iter().zip(&guards) {
            let state = guard.as_deref().ok_or_else(|| entity.detached())?;
            changes.push(StateChange {
                status: entity.status(),
                state,
            });
        }
        let committer = self.inner.store.lock().prepare(&changes)?;
        Ok(committer)
    }

    fn complete_submit(&self, entities: &[Entity]) {
        for entity in entities {
            if entity.status() == EntityStatus::Removed {
                self.forget_identity(entity);
                entity.evict();
            } else {
                entity.set_status(EntityStatus::Loaded);
                entity.mark_saved();
                entity.reset_caches();
            }
        }
        self.clear_modified(entities.iter());
    }

    /// Reloads the given entities' states in place. Returns the ids the
    /// store no longer has.
    fn rollback_states(&self, entities: &[Entity]) -> CoreResult<Vec<EntityId>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let mut guards: Vec<_> = entities
            .iter()
            .map(|entity| entity.inner.state.write())
            .collect();
        let mut targets = Vec::with_capacity(entities.len());
        for (entity, guard) in entities.iter().zip(guards.iter_mut()) {
            let status = entity.status();
            let state = guard.as_deref_mut().ok_or_else(|| entity.detached())?;
            targets.push(StateRollback { status, state });
        }
        let vanished = self.inner.store.lock().rollback(&mut targets)?;
        Ok(vanished)
    }

    /// Runs every hook for `event`. A failure aborts an abortable event;
    /// otherwise it is logged and the remaining hooks still run.
    fn fire(&self, event: LifecycleEvent) -> CoreResult<()> {
        let hooks: Vec<Arc<dyn LifecycleHook>> = self
            .inner
            .shared
            .hooks
            .iter()
            .cloned()
            .chain(self.inner.hooks.read().iter().cloned())
            .collect();
        for hook in hooks {
            match hook.on_event(event, self) {
                Err(e) if event.is_abortable() => return Err(e),
                Err(e) => {
                    warn!(unit_of_work = %self.inner.id, %event, error = %e, "lifecycle hook failed");
                }
                Ok(()) => {}
            }
        }
        Ok(())
    }

    /// Tells the store the entity now holds the state it handed out.
    fn bind(&self, entity: &Entity) {
        self.inner.store.lock().state_bound(entity.id());
    }

    fn cached(&self, id: &EntityId) -> Option<Entity> {
        self.inner
            .identity
            .read()
            .get(id)
            .and_then(Weak::upgrade)
            .map(Entity::from_inner)
    }

    /// Caches a state as an entity. Returns the already cached instance
    /// and `false` if there is one.
    fn attach(
        &self,
        state: Box<dyn CompositeState>,
        status: EntityStatus,
    ) -> CoreResult<(Entity, bool)> {
        let descriptor = self.inner.shared.registry.descriptor(state.type_name())?;
        let id = state.id().clone();
        let mut identity = self.inner.identity.write();
        if let Some(existing) = identity.get(&id).and_then(Weak::upgrade) {
            return Ok((Entity::from_inner(existing), false));
        }

        let entity = InstanceBuilder::new(descriptor, state)
            .status(status)
            .owner(&self.inner)
            .build()?;
        if identity.len() >= self.inner.shared.config.identity_prune_threshold {
            let before = identity.len();
            identity.retain(|_, weak| weak.strong_count() > 0);
            trace!(unit_of_work = %self.inner.id, pruned = before - identity.len(), "identity cache pruned");
        }
        identity.insert(id, entity.downgrade());
        Ok((entity, true))
    }

    fn ensure_owned(&self, entity: &Entity) -> CoreResult<()> {
        entity.ensure_attached()?;
        if entity.belongs_to(&self.inner) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{} belongs to {}, not {}",
                entity.reference(),
                entity.unit_of_work_id(),
                self.inner.id
            )))
        }
    }

    /// Drops an entity from the identity cache and the modified set.
    pub(super) fn forget(&self, entity: &Entity) {
        self.clear_modified(std::iter::once(entity));
        self.forget_identity(entity);
    }

    fn forget_identity(&self, entity: &Entity) {
        let mut identity = self.inner.identity.write();
        if identity
            .get(entity.id())
            .is_some_and(|weak| Weak::ptr_eq(weak, &entity.downgrade()))
        {
            identity.remove(entity.id());
        }
    }

    pub(super) fn clear_modified<'a>(&self, entities: impl IntoIterator<Item = &'a Entity>) {
        let mut modified = self.inner.modified.lock();
        for entity in entities {
            if modified.get(entity.id()).is_some_and(|m| m.ptr_eq(entity)) {
                modified.remove(entity.id());
            }
        }
    }
}

fn visible_as(entity: Entity, registry: &SchemaRegistry, entity_type: &str) -> Option<Entity> {
    (entity.status().is_visible() && registry.is_assignable(entity.type_name(), entity_type))
        .then_some(entity)
}

fn matches(expression: Option<&Expression>, entity: &Entity) -> CoreResult<bool> {
    expression.map_or(Ok(true), |expression| expression.evaluate(entity))
}
