//! Association accessors.
//!
//! Associations store the target's id. Dereferencing goes through the
//! owning unit of work, so the target is the same instance any other
//! lookup in that unit of work returns.

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::schema::PropertyDescriptor;
use entimap_codec::Value;

fn target_of(property: &PropertyDescriptor) -> &str {
    property.kind().target().unwrap_or_default()
}

/// Checks that `other` can be referenced from `owner` through `property`.
fn check_target(owner: &Entity, property: &PropertyDescriptor, other: &Entity) -> CoreResult<()> {
    if owner.unit_of_work_id() != other.unit_of_work_id() {
        return Err(CoreError::invalid_operation(format!(
            "{} belongs to {}, not {}",
            other.reference(),
            other.unit_of_work_id(),
            owner.unit_of_work_id()
        )));
    }
    other.ensure_attached()?;
    let unit_of_work = owner.unit_of_work()?;
    let target = target_of(property);
    if !unit_of_work.registry().is_assignable(other.type_name(), target) {
        return Err(CoreError::invalid_operation(format!(
            "{}.{} expects {target}, got {}",
            owner.type_name(),
            property.name(),
            other.type_name()
        )));
    }
    Ok(())
}

/// Resolves an id through the owner's unit of work.
fn resolve(owner: &Entity, target: &str, id: &EntityId) -> CoreResult<Option<Entity>> {
    owner.unit_of_work()?.entity(target, id)
}

fn ids_of(value: Value) -> Vec<EntityId> {
    value
        .into_list()
        .iter()
        .filter_map(EntityId::from_value)
        .collect()
}

/// Reference to at most one other entity.
#[derive(Debug, Clone)]
pub struct Association {
    entity: Entity,
    index: usize,
}

impl Association {
    pub(crate) fn new(entity: Entity, index: usize) -> Self {
        Self { entity, index }
    }

    /// Property name.
    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Property descriptor.
    pub fn descriptor(&self) -> &PropertyDescriptor {
        self.entity.property_descriptor(self.index)
    }

    /// Id of the referenced entity.
    pub fn id(&self) -> CoreResult<Option<EntityId>> {
        Ok(EntityId::from_value(&self.entity.read_property(self.index)?))
    }

    /// The referenced entity, or `None` if unset, missing or removed.
    pub fn get(&self) -> CoreResult<Option<Entity>> {
        let Some(id) = self.id()? else {
            return Ok(None);
        };
        let slot = self.entity.slot(self.index);
        if let Some(cached) = slot.resolved(&id) {
            if cached.status().is_visible() {
                return Ok(Some(cached));
            }
        }
        let resolved = resolve(&self.entity, target_of(self.descriptor()), &id)?;
        if let Some(target) = &resolved {
            slot.remember(target);
        }
        Ok(resolved)
    }

    /// Points the association at `target`, or clears it.
    pub fn set(&self, target: Option<&Entity>) -> CoreResult<()> {
        let value = match target {
            Some(other) => {
                check_target(&self.entity, self.descriptor(), other)?;
                Value::from(other.id())
            }
            None => Value::Null,
        };
        self.entity.write_property(self.index, value)
    }
}

/// Ordered references to several entities.
#[derive(Debug, Clone)]
pub struct ManyAssociation {
    entity: Entity,
    index: usize,
}

impl ManyAssociation {
    pub(crate) fn new(entity: Entity, index: usize) -> Self {
        Self { entity, index }
    }

    /// Property name.
    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Property descriptor.
    pub fn descriptor(&self) -> &PropertyDescriptor {
        self.entity.property_descriptor(self.index)
    }

    /// Ids of the referenced entities, in order.
    pub fn ids(&self) -> CoreResult<Vec<EntityId>> {
        Ok(ids_of(self.entity.read_property(self.index)?))
    }

    /// Number of references.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.ids()?.len())
    }

    /// True if `other` is referenced.
    pub fn contains(&self, other: &Entity) -> CoreResult<bool> {
        Ok(self.ids()?.contains(other.id()))
    }

    /// The entity at `index`, or `None` if out of range, missing or removed.
    pub fn get(&self, index: usize) -> CoreResult<Option<Entity>> {
        match self.ids()?.get(index) {
            Some(id) => resolve(&self.entity, target_of(self.descriptor()), id),
            None => Ok(None),
        }
    }

    /// Every referenced entity that can still be resolved.
    pub fn to_vec(&self) -> CoreResult<Vec<Entity>> {
        let target = target_of(self.descriptor());
        let mut entities = Vec::new();
        for id in self.ids()? {
            if let Some(entity) = resolve(&self.entity, target, &id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Appends `other`; returns false if it was already referenced.
    pub fn add(&self, other: &Entity) -> CoreResult<bool> {
        check_target(&self.entity, self.descriptor(), other)?;
        let mut ids = self.ids()?;
        if ids.contains(other.id()) {
            return Ok(false);
        }
        ids.push(other.id().clone());
        self.write(ids)?;
        Ok(true)
    }

    /// Removes `other`; returns false if it was not referenced.
    pub fn remove(&self, other: &Entity) -> CoreResult<bool> {
        let mut ids = self.ids()?;
        let before = ids.len();
        ids.retain(|id| id != other.id());
        if ids.len() == before {
            return Ok(false);
        }
        self.write(ids)?;
        Ok(true)
    }

    /// Removes every reference.
    pub fn clear(&self) -> CoreResult<()> {
        self.write(Vec::new())
    }

    fn write(&self, ids: Vec<EntityId>) -> CoreResult<()> {
        let value = Value::List(ids.iter().map(Value::from).collect());
        self.entity.write_property(self.index, value)
    }
}
