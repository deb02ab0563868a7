//! Property concerns: ordered interceptors around raw property access.
//!
//! Every property's chain starts with [`ConstraintConcern`], followed by the
//! concerns its descriptor declares. Reads pass the raw value through the
//! chain in order; writes pass the proposed value through the chain and
//! store whatever comes out. The raw state accessor is called directly by
//! the entity, never reached by unwrapping the chain.

use crate::entity::{Entity, PropertySlot};
use crate::error::{CoreError, CoreResult};
use crate::schema::{PropertyDescriptor, PropertyKind};
use entimap_codec::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a concern sees of the property being accessed.
pub struct ConcernContext<'a> {
    entity: &'a Entity,
    property: &'a PropertyDescriptor,
    slot: &'a PropertySlot,
}

impl<'a> ConcernContext<'a> {
    pub(crate) fn new(
        entity: &'a Entity,
        property: &'a PropertyDescriptor,
        slot: &'a PropertySlot,
    ) -> Self {
        Self {
            entity,
            property,
            slot,
        }
    }

    /// The entity being accessed.
    pub fn entity(&self) -> &Entity {
        self.entity
    }

    /// The property being accessed.
    pub fn property(&self) -> &PropertyDescriptor {
        self.property
    }

    /// The property's default, computed once per entity and cached until
    /// the entity's caches are reset.
    pub fn default_value(&self) -> Value {
        match self.property.kind() {
            PropertyKind::ManyAssociation { .. } | PropertyKind::Collection(_)
                if self.property.default().is_none() =>
            {
                Value::List(Vec::new())
            }
            _ => self.slot.default_value(self.property),
        }
    }
}

/// Cross-cutting behavior around one property.
pub trait PropertyConcern: Send + Sync + fmt::Debug {
    /// Transforms a value on its way out of the state.
    fn on_read(&self, ctx: &ConcernContext<'_>, value: Value) -> CoreResult<Value> {
        let _ = ctx;
        Ok(value)
    }

    /// Checks or transforms a value on its way into the state.
    ///
    /// `current` is the raw value before the write.
    fn on_write(&self, ctx: &ConcernContext<'_>, current: &Value, value: Value) -> CoreResult<Value> {
        let _ = (ctx, current);
        Ok(value)
    }
}

/// Nullability, immutability and default substitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintConcern;

impl ConstraintConcern {
    fn must_not_be_null(property: &PropertyDescriptor) -> bool {
        !property.is_nullable()
            && matches!(
                property.kind(),
                PropertyKind::Value | PropertyKind::Association { .. }
            )
    }
}

impl PropertyConcern for ConstraintConcern {
    fn on_read(&self, ctx: &ConcernContext<'_>, value: Value) -> CoreResult<Value> {
        if !value.is_null() {
            return Ok(value);
        }
        let value = ctx.default_value();
        if value.is_null() && Self::must_not_be_null(ctx.property) {
            return Err(CoreError::not_nullable(
                ctx.entity.type_name(),
                ctx.property.name(),
            ));
        }
        Ok(value)
    }

    fn on_write(&self, ctx: &ConcernContext<'_>, current: &Value, value: Value) -> CoreResult<Value> {
        if ctx.property.is_immutable() && !current.is_null() {
            return Err(CoreError::immutable(
                ctx.entity.type_name(),
                ctx.property.name(),
            ));
        }
        if value.is_null() && Self::must_not_be_null(ctx.property) {
            return Err(CoreError::not_nullable(
                ctx.entity.type_name(),
                ctx.property.name(),
            ));
        }
        Ok(value)
    }
}

/// Counts reads and writes passing through a property.
#[derive(Debug, Default)]
pub struct InvocationCounter {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InvocationCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads observed.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Writes observed.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl PropertyConcern for InvocationCounter {
    fn on_read(&self, _ctx: &ConcernContext<'_>, value: Value) -> CoreResult<Value> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    fn on_write(&self, _ctx: &ConcernContext<'_>, _current: &Value, value: Value) -> CoreResult<Value> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }
}
