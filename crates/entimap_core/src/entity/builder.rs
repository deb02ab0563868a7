//! Entity instance assembly.

use crate::entity::instance::{EntityInner, PropertySlot};
use crate::entity::{Entity, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::schema::EntityDescriptor;
use crate::state::CompositeState;
use crate::types::UnitOfWorkId;
use crate::uow::UnitOfWorkInner;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

/// Assembles an [`Entity`] from its descriptor, state and owner.
///
/// One property slot is allocated per declared property; the concern
/// chains themselves live on the descriptor and are shared.
pub(crate) struct InstanceBuilder {
    descriptor: Arc<EntityDescriptor>,
    state: Box<dyn CompositeState>,
    status: EntityStatus,
    owner: Weak<UnitOfWorkInner>,
    owner_id: UnitOfWorkId,
}

impl InstanceBuilder {
    pub(crate) fn new(descriptor: Arc<EntityDescriptor>, state: Box<dyn CompositeState>) -> Self {
        Self {
            descriptor,
            state,
            status: EntityStatus::Loaded,
            owner: Weak::new(),
            owner_id: UnitOfWorkId::new(0),
        }
    }

    pub(crate) fn status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn owner(mut self, owner: &Arc<UnitOfWorkInner>) -> Self {
        self.owner = Arc::downgrade(owner);
        self.owner_id = owner.id();
        self
    }

    pub(crate) fn build(self) -> CoreResult<Entity> {
        if self.state.type_name() != self.descriptor.name() {
            return Err(CoreError::invalid_operation(format!(
                "state of type {} cannot back an entity of type {}",
                self.state.type_name(),
                self.descriptor.name()
            )));
        }

        let slots = self
            .descriptor
            .properties()
            .iter()
            .map(|_| PropertySlot::default())
            .collect();

        Ok(Entity::from_inner(Arc::new(EntityInner {
            id: self.state.id().clone(),
            descriptor: self.descriptor,
            status: Mutex::new(self.status),
            unsaved: AtomicBool::new(self.status == EntityStatus::Created),
            state: RwLock::new(Some(self.state)),
            slots,
            owner: self.owner,
            owner_id: self.owner_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyDescriptor;
    use crate::store::MemoryState;
    use entimap_codec::Document;

    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("Person")
                .property(PropertyDescriptor::value("name"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn builds_with_one_slot_per_property() {
        let state = MemoryState::new("p1".into(), "Person", Document::new().with("name", "Ann"));
        let entity = InstanceBuilder::new(descriptor(), Box::new(state))
            .status(EntityStatus::Created)
            .build()
            .unwrap();

        assert_eq!(entity.id().as_str(), "p1");
        assert_eq!(entity.status(), EntityStatus::Created);
        assert_eq!(entity.inner.slots.len(), 1);
        assert!(entity.is_unsaved());
    }

    #[test]
    fn entity_without_owner_is_detached() {
        let state = MemoryState::new("p1".into(), "Person", Document::new());
        let entity = InstanceBuilder::new(descriptor(), Box::new(state))
            .build()
            .unwrap();

        assert!(!entity.is_attached());
        assert!(matches!(entity.get("name"), Err(CoreError::Detached { .. })));
    }

    #[test]
    fn type_mismatch_rejected() {
        let state = MemoryState::new("a1".into(), "Address", Document::new());
        let result = InstanceBuilder::new(descriptor(), Box::new(state)).build();
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }
}
