//! Store side of a nested unit of work.
//!
//! A nested scope treats its parent as its store: loads clone the parent's
//! instances, and a submit writes the changes back into the parent, which
//! then carries them as its own pending modifications.

use super::UnitOfWork;
use crate::entity::{Entity, EntityId, EntityReference, EntityStatus};
use crate::error::{ConflictPhase, CoreError, CoreResult};
use crate::spi::{
    LockOutcome, StateChange, StateCommitter, StateRollback, StateStream, StoreQuery,
    StoreUnitOfWork, SubmitResult,
};
use crate::state::CompositeState;
use entimap_codec::Document;
use tracing::{debug, warn};

pub(crate) struct ParentStoreUnitOfWork {
    parent: UnitOfWork,
}

impl ParentStoreUnitOfWork {
    pub(crate) fn new(parent: UnitOfWork) -> Self {
        Self { parent }
    }
}

impl StoreUnitOfWork for ParentStoreUnitOfWork {
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>> {
        match self.parent.entity(entity_type, id)? {
            Some(entity) => self.parent.clone_state(&entity).map(Some),
            None => Ok(None),
        }
    }

    fn new_entity_state(
        &mut self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.parent.new_state(id, entity_type)
    }

    fn adopt_entity_state(
        &mut self,
        raw: Document,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.parent.adopt_state(raw, entity_type)
    }

    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream> {
        let entities = self.parent.execute_query(&query.entity_type, None)?;
        let states: Vec<CoreResult<(EntityId, Box<dyn CompositeState>)>> = entities
            .iter()
            .map(|entity| {
                self.parent
                    .clone_state(entity)
                    .map(|state| (entity.id().clone(), state))
            })
            .collect();
        Ok(Box::new(states.into_iter()))
    }

    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>> {
        self.parent.ensure_open()?;
        let mut missing = Vec::new();
        let mut staged = Vec::with_capacity(changes.len());
        for change in changes {
            let target = self.parent.entity(change.state.type_name(), change.id())?;
            match (change.status, &target) {
                (EntityStatus::Created, Some(_)) => {
                    return Err(CoreError::DuplicateId {
                        id: change.id().clone(),
                    });
                }
                (EntityStatus::Modified, None) => missing.push(change.reference()),
                (_, Some(entity)) => self.parent.prepare_modification(entity)?,
                _ => {}
            }
            let state = self.parent.inner.store.lock().clone_entity_state(change.state)?;
            staged.push(StagedChange {
                status: change.status,
                state,
                target,
            });
        }
        if !missing.is_empty() {
            return Err(CoreError::concurrent_modification(
                ConflictPhase::Prepare,
                missing,
            ));
        }
        Ok(Box::new(NestedCommitter {
            parent: self.parent.clone(),
            staged,
        }))
    }

    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>> {
        let mut vanished = Vec::new();
        for target in targets.iter_mut() {
            if !self.parent.restore_into(&mut *target.state)? {
                vanished.push(target.state.id().clone());
            }
        }
        Ok(vanished)
    }

    fn supports_cloning(&self) -> bool {
        self.parent.supports_cloning()
    }

    fn clone_entity_state(&self, state: &dyn CompositeState) -> CoreResult<Box<dyn CompositeState>> {
        self.parent.inner.store.lock().clone_entity_state(state)
    }

    fn reincorporate_entity_state(
        &self,
        target: &mut dyn CompositeState,
        source: &dyn CompositeState,
    ) -> CoreResult<()> {
        self.parent
            .inner
            .store
            .lock()
            .reincorporate_entity_state(target, source)
    }

    fn before_modify(&mut self, id: &EntityId, entity_type: &str) -> CoreResult<LockOutcome> {
        let outcome = self
            .parent
            .inner
            .store
            .lock()
            .before_modify(id, entity_type)?;
        if outcome == LockOutcome::Contended {
            if let Some(entity) = self.parent.entity(entity_type, id)? {
                if entity.status() == EntityStatus::Loaded {
                    self.parent.reload(&entity)?;
                }
            }
        }
        Ok(outcome)
    }
}

struct StagedChange {
    status: EntityStatus,
    state: Box<dyn CompositeState>,
    /// Parent instance, resolved and write-locked during prepare.
    target: Option<Entity>,
}

/// A change already written into the parent, kept so a failed commit can
/// take it back.
enum Applied {
    Adopted(Entity),
    Changed {
        entity: Entity,
        status: EntityStatus,
        pending: bool,
        backup: Box<dyn CompositeState>,
    },
}

struct NestedCommitter {
    parent: UnitOfWork,
    staged: Vec<StagedChange>,
}

impl NestedCommitter {
    fn apply(parent: &UnitOfWork, change: StagedChange, applied: &mut Vec<Applied>) -> CoreResult<()> {
        let StagedChange {
            status,
            state,
            target,
        } = change;
        match (status, target) {
            (EntityStatus::Created, _) => {
                applied.push(Applied::Adopted(parent.adopt_created(state)?));
            }
            (_, Some(entity)) => {
                let backup = parent.clone_state(&entity)?;
                let previous = entity.status();
                applied.push(Applied::Changed {
                    entity: entity.clone(),
                    status: previous,
                    pending: previous.is_modified(),
                    backup,
                });
                if status == EntityStatus::Removed {
                    parent.remove_entity(&entity)?;
                } else {
                    parent.reincorporate(&entity, state.as_ref())?;
                    parent.mark_modified(&entity);
                }
            }
            (EntityStatus::Removed, None) => {}
            (_, None) => {
                return Err(CoreError::concurrent_modification(
                    ConflictPhase::Commit,
                    vec![EntityReference::new(state.type_name(), state.id().clone())],
                ));
            }
        }
        Ok(())
    }

    /// Takes back applied changes, newest first.
    fn undo(parent: &UnitOfWork, applied: Vec<Applied>) {
        for step in applied.into_iter().rev() {
            match step {
                Applied::Adopted(entity) => {
                    parent.forget(&entity);
                    entity.detach();
                }
                Applied::Changed {
                    entity,
                    status,
                    pending,
                    backup,
                } => {
                    if let Err(error) = parent.reincorporate(&entity, backup.as_ref()) {
                        warn!(entity = %entity.reference(), %error, "parent entity not restored");
                    }
                    entity.set_status(status);
                    if !pending {
                        parent.clear_modified(std::iter::once(&entity));
                    }
                }
            }
        }
    }
}

impl StateCommitter for NestedCommitter {
    fn commit(self: Box<Self>) -> CoreResult<SubmitResult> {
        let NestedCommitter { parent, staged } = *self;
        let mut result = SubmitResult::default();
        let mut applied = Vec::with_capacity(staged.len());
        for change in staged {
            let status = change.status;
            let id = change.state.id().clone();
            if let Err(error) = Self::apply(&parent, change, &mut applied) {
                debug!(parent = %parent.id(), undone = applied.len(), %error, "nested merge failed");
                Self::undo(&parent, applied);
                return Err(error);
            }
            result.record(status, id);
        }
        debug!(
            parent = %parent.id(),
            changes = result.len(),
            "nested changes merged into parent"
        );
        Ok(result)
    }

    fn cancel(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use crate::entity::EntityStatus;
    use crate::error::CoreError;
    use crate::test_support::{repository, sample_registry};
    use entimap_codec::Value;

    #[test]
    fn nested_changes_stay_private_until_submit() {
        let repo = repository(sample_registry());
        let parent = repo.new_unit_of_work().unwrap();
        let person = parent.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();
        parent.submit().unwrap();

        let child = parent.new_unit_of_work().unwrap();
        let copy = child.entity("Person", person.id()).unwrap().unwrap();
        assert!(!copy.ptr_eq(&person));
        copy.set("name", "Bea").unwrap();
        assert_eq!(person.get("name").unwrap(), Value::from("Ann"));

        child.submit().unwrap();
        assert_eq!(person.get("name").unwrap(), Value::from("Bea"));
        assert_eq!(person.status(), EntityStatus::Modified);
        assert_eq!(parent.modified_entities(), vec![person.clone()]);
    }

    #[test]
    fn nested_create_and_remove_reach_parent() {
        let repo = repository(sample_registry());
        let parent = repo.new_unit_of_work().unwrap();
        let doomed = parent.create_entity("Person", None).unwrap();
        doomed.set("name", "Old").unwrap();
        parent.submit().unwrap();

        let child = parent.new_unit_of_work().unwrap();
        let fresh = child.create_entity("Person", None).unwrap();
        fresh.set("name", "New").unwrap();
        let copy = child.entity("Person", doomed.id()).unwrap().unwrap();
        child.remove_entity(&copy).unwrap();
        let result = child.submit().unwrap();
        assert_eq!(result.created.len(), 1);
        assert_eq!(result.removed.len(), 1);

        let adopted = parent.entity("Person", fresh.id()).unwrap().unwrap();
        assert_eq!(adopted.status(), EntityStatus::Created);
        assert_eq!(adopted.get("name").unwrap(), Value::from("New"));
        assert_eq!(doomed.status(), EntityStatus::Removed);
        assert_eq!(parent.entity("Person", doomed.id()).unwrap(), None);
    }

    #[test]
    fn nested_discard_reloads_from_parent() {
        let repo = repository(sample_registry());
        let parent = repo.new_unit_of_work().unwrap();
        let person = parent.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();

        let child = parent.new_unit_of_work().unwrap();
        let copy = child.entity("Person", person.id()).unwrap().unwrap();
        copy.set("name", "Bea").unwrap();
        child.discard().unwrap();
        assert_eq!(copy.get("name").unwrap(), Value::from("Ann"));
        assert_eq!(copy.status(), EntityStatus::Loaded);
    }

    #[test]
    fn nested_query_sees_parent_pending_changes() {
        let repo = repository(sample_registry());
        let parent = repo.new_unit_of_work().unwrap();
        let person = parent.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();

        let child = parent.new_unit_of_work().unwrap();
        let found = child.query("Person").unwrap().list().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), person.id());
        assert!(!found[0].ptr_eq(&person));
    }

    #[test]
    fn closed_parent_fails_nested_operations() {
        let repo = repository(sample_registry());
        let parent = repo.new_unit_of_work().unwrap();
        let child = parent.new_unit_of_work().unwrap();
        assert_eq!(child.parent(), Some(parent.clone()));
        parent.close();

        let err = child.create_entity("Person", None).unwrap_err();
        assert!(matches!(err, CoreError::UnitOfWorkClosed { .. }));
    }
}
