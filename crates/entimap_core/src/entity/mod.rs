//! Entity identity and state context.

mod builder;
mod id;
mod instance;
mod status;

pub(crate) use builder::InstanceBuilder;
pub use id::EntityId;
pub use instance::Entity;
pub(crate) use instance::{EntityInner, PropertySlot};
pub use status::EntityStatus;

use std::fmt;

/// A (type, id) pair naming an entity outside of any unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityReference {
    /// Concrete type name.
    pub entity_type: String,
    /// Entity id.
    pub id: EntityId,
}

impl EntityReference {
    /// Creates a reference.
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity_type, self.id)
    }
}
