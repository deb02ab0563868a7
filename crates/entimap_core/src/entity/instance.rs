//! Entity handles.

use crate::entity::{EntityId, EntityReference, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::property::{
    Association, CollectionProperty, ConcernContext, ManyAssociation, Property,
};
use crate::schema::{EntityDescriptor, PropertyDescriptor};
use crate::state::CompositeState;
use crate::types::UnitOfWorkId;
use crate::uow::{UnitOfWork, UnitOfWorkInner};
use entimap_codec::{Document, Value};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Per-property caches of one entity.
#[derive(Debug, Default)]
pub(crate) struct PropertySlot {
    default: Mutex<Option<Value>>,
    resolved: Mutex<Option<(EntityId, Weak<EntityInner>)>>,
}

impl PropertySlot {
    /// Default value, computed on first use.
    pub(crate) fn default_value(&self, property: &PropertyDescriptor) -> Value {
        let Some(default) = property.default() else {
            return Value::Null;
        };
        self.default
            .lock()
            .get_or_insert_with(|| default.produce())
            .clone()
    }

    pub(crate) fn resolved(&self, id: &EntityId) -> Option<Entity> {
        let resolved = self.resolved.lock();
        match resolved.as_ref() {
            Some((cached, weak)) if cached == id => weak.upgrade().map(Entity::from_inner),
            _ => None,
        }
    }

    pub(crate) fn remember(&self, entity: &Entity) {
        *self.resolved.lock() = Some((entity.id().clone(), Arc::downgrade(&entity.inner)));
    }

    pub(crate) fn reset(&self) {
        *self.default.lock() = None;
        *self.resolved.lock() = None;
    }
}

pub(crate) struct EntityInner {
    pub(crate) id: EntityId,
    pub(crate) descriptor: Arc<EntityDescriptor>,
    pub(crate) status: Mutex<EntityStatus>,
    /// Set while the store has never seen the entity.
    pub(crate) unsaved: AtomicBool,
    pub(crate) state: RwLock<Option<Box<dyn CompositeState>>>,
    pub(crate) slots: Box<[PropertySlot]>,
    pub(crate) owner: Weak<UnitOfWorkInner>,
    pub(crate) owner_id: UnitOfWorkId,
}

/// A domain object tracked by a unit of work.
///
/// `Entity` is a cheap handle; clones refer to the same instance, and
/// equality is identity. A unit of work hands out at most one instance per
/// id, so two handles for the same id from the same unit of work are
/// always equal.
#[derive(Clone)]
pub struct Entity {
    pub(crate) inner: Arc<EntityInner>,
}

impl Entity {
    pub(crate) fn from_inner(inner: Arc<EntityInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<EntityInner> {
        Arc::downgrade(&self.inner)
    }

    /// Entity id.
    pub fn id(&self) -> &EntityId {
        &self.inner.id
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &str {
        self.inner.descriptor.name()
    }

    /// Type descriptor.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.inner.descriptor
    }

    /// (type, id) pair naming this entity.
    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.type_name(), self.id().clone())
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EntityStatus {
        *self.inner.status.lock()
    }

    /// Id of the owning unit of work.
    pub fn unit_of_work_id(&self) -> UnitOfWorkId {
        self.inner.owner_id
    }

    /// True if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True while property access is possible.
    pub fn is_attached(&self) -> bool {
        self.ensure_attached().is_ok()
    }

    /// The owning unit of work.
    ///
    /// # Errors
    ///
    /// Returns `Detached` once the unit of work is closed or dropped.
    pub fn unit_of_work(&self) -> CoreResult<UnitOfWork> {
        self.inner
            .owner
            .upgrade()
            .filter(|owner| owner.is_open())
            .map(UnitOfWork::from_inner)
            .ok_or_else(|| self.detached())
    }

    pub(crate) fn detached(&self) -> CoreError {
        CoreError::Detached {
            id: self.id().clone(),
        }
    }

    pub(crate) fn ensure_attached(&self) -> CoreResult<()> {
        if self.status().is_terminal() || self.inner.state.read().is_none() {
            return Err(self.detached());
        }
        match self.inner.owner.upgrade() {
            Some(owner) if owner.is_open() => Ok(()),
            _ => Err(self.detached()),
        }
    }

    pub(crate) fn belongs_to(&self, owner: &Arc<UnitOfWorkInner>) -> bool {
        std::ptr::eq(self.inner.owner.as_ptr(), Arc::as_ptr(owner))
    }

    /// Single-valued property accessor.
    pub fn property(&self, name: &str) -> CoreResult<Property> {
        let (index, descriptor) = self.inner.descriptor.require(name)?;
        descriptor.ensure_kind(self.type_name(), "value")?;
        Ok(Property::new(self.clone(), index))
    }

    /// Association accessor.
    pub fn association(&self, name: &str) -> CoreResult<Association> {
        let (index, descriptor) = self.inner.descriptor.require(name)?;
        descriptor.ensure_kind(self.type_name(), "association")?;
        Ok(Association::new(self.clone(), index))
    }

    /// Many-association accessor.
    pub fn many_association(&self, name: &str) -> CoreResult<ManyAssociation> {
        let (index, descriptor) = self.inner.descriptor.require(name)?;
        descriptor.ensure_kind(self.type_name(), "many-association")?;
        Ok(ManyAssociation::new(self.clone(), index))
    }

    /// Collection accessor.
    pub fn collection(&self, name: &str) -> CoreResult<CollectionProperty> {
        let (index, descriptor) = self.inner.descriptor.require(name)?;
        descriptor.ensure_kind(self.type_name(), "collection")?;
        Ok(CollectionProperty::new(self.clone(), index))
    }

    /// Reads any property through its concern chain.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        let (index, _) = self.inner.descriptor.require(name)?;
        self.read_property(index)
    }

    /// Writes any property through its concern chain.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let (index, _) = self.inner.descriptor.require(name)?;
        self.write_property(index, value.into())
    }

    /// Copies the raw state.
    pub fn snapshot(&self) -> CoreResult<Document> {
        self.ensure_attached()?;
        self.inner
            .state
            .read()
            .as_ref()
            .map(|state| state.snapshot())
            .ok_or_else(|| self.detached())
    }

    pub(crate) fn property_descriptor(&self, index: usize) -> &PropertyDescriptor {
        &self.inner.descriptor.properties()[index]
    }

    pub(crate) fn slot(&self, index: usize) -> &PropertySlot {
        &self.inner.slots[index]
    }

    pub(crate) fn read_property(&self, index: usize) -> CoreResult<Value> {
        self.ensure_attached()?;
        let property = self.property_descriptor(index);
        if let Some(computed) = property.computed_fn() {
            return computed(self);
        }

        let ctx = ConcernContext::new(self, property, self.slot(index));
        let mut value = self.read_stored(property)?;
        for concern in self.inner.descriptor.chain(index) {
            value = concern.on_read(&ctx, value)?;
        }
        Ok(value)
    }

    pub(crate) fn write_property(&self, index: usize, value: Value) -> CoreResult<()> {
        let property = self.property_descriptor(index);
        if property.is_computed() {
            return Err(CoreError::unsupported(format!(
                "write to computed property {}.{}",
                self.type_name(),
                property.name()
            )));
        }
        self.ensure_attached()?;
        let unit_of_work = self.unit_of_work()?;
        unit_of_work.prepare_modification(self)?;

        let ctx = ConcernContext::new(self, property, self.slot(index));
        let current = self.read_raw(property.name())?;
        let mut value = value;
        for concern in self.inner.descriptor.chain(index) {
            value = concern.on_write(&ctx, &current, value)?;
        }

        self.write_raw(property.name(), value)?;
        unit_of_work.mark_modified(self);
        self.slot(index).reset();
        Ok(())
    }

    pub(crate) fn read_raw(&self, name: &str) -> CoreResult<Value> {
        self.inner
            .state
            .read()
            .as_ref()
            .map(|state| state.load(name))
            .ok_or_else(|| self.detached())
    }

    /// Raw value for a read. A set multi-valued property goes through the
    /// state's element enumeration; unset stays null so defaults apply.
    fn read_stored(&self, property: &PropertyDescriptor) -> CoreResult<Value> {
        let guard = self.inner.state.read();
        let state = guard.as_deref().ok_or_else(|| self.detached())?;
        let raw = state.load(property.name());
        if raw.is_null() || !property.kind().is_multi_valued() {
            return Ok(raw);
        }
        Ok(Value::List(state.values(property.name())))
    }

    fn write_raw(&self, name: &str, value: Value) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        let state = state.as_mut().ok_or_else(|| self.detached())?;
        state.store(name, value);
        Ok(())
    }

    /// Raises the status; returns true if it changed.
    pub(crate) fn raise_status(&self, target: EntityStatus) -> bool {
        let mut status = self.inner.status.lock();
        match status.raised_to(target) {
            Some(raised) => {
                *status = raised;
                true
            }
            None => false,
        }
    }

    /// True until a submit writes the entity to the store. Stays true
    /// when an entity created in this unit of work is removed again.
    pub(crate) fn is_unsaved(&self) -> bool {
        self.inner.unsaved.load(Ordering::Acquire)
    }

    pub(crate) fn mark_saved(&self) {
        self.inner.unsaved.store(false, Ordering::Release);
    }

    /// Sets the status unconditionally; used by submit and rollback.
    pub(crate) fn set_status(&self, status: EntityStatus) {
        *self.inner.status.lock() = status;
    }

    pub(crate) fn reset_caches(&self) {
        for slot in self.inner.slots.iter() {
            slot.reset();
        }
    }

    /// Drops the state; every later access fails.
    pub(crate) fn detach(&self) {
        self.set_status(EntityStatus::Detached);
        *self.inner.state.write() = None;
        self.reset_caches();
    }

    /// Drops the state of a submitted removal.
    pub(crate) fn evict(&self) {
        self.set_status(EntityStatus::Evicted);
        *self.inner.state.write() = None;
        self.reset_caches();
    }

    /// Swaps in a new state of the same entity.
    pub(crate) fn replace_state(&self, state: Box<dyn CompositeState>) {
        *self.inner.state.write() = Some(state);
        self.reset_caches();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name())
            .field("id", self.id())
            .field("status", &self.status())
            .field("unit_of_work", &self.inner.owner_id)
            .finish()
    }
}
