//! Single-valued property accessor.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::schema::PropertyDescriptor;
use entimap_codec::{CodecError, Value};

/// Reads and writes one single-valued property of an entity.
#[derive(Debug, Clone)]
pub struct Property {
    entity: Entity,
    index: usize,
}

impl Property {
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

    /// Owning entity.
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Current value, after defaults and constraints.
    pub fn get(&self) -> CoreResult<Value> {
        self.entity.read_property(self.index)
    }

    /// Current value converted to a Rust type.
    pub fn get_as<T>(&self) -> CoreResult<T>
    where
        T: TryFrom<Value, Error = CodecError>,
    {
        T::try_from(self.get()?).map_err(CoreError::from)
    }

    /// Writes a new value.
    pub fn set(&self, value: impl Into<Value>) -> CoreResult<()> {
        self.entity.write_property(self.index, value.into())
    }
}
