//! Composite state: the mutable record behind an entity.

use crate::entity::EntityId;
use entimap_codec::{Document, Value};
use std::any::Any;
use std::fmt;

/// Backing record that an entity's property accessors read and write.
///
/// Store adapters supply their own implementations (a feature, a document,
/// a key/value map). The unit of work that loaded or created a state owns
/// it; entities only reach it through their owner.
pub trait CompositeState: Send + Sync + fmt::Debug {
    /// Identifier of the entity this state backs.
    fn id(&self) -> &EntityId;

    /// Concrete entity type name.
    fn type_name(&self) -> &str;

    /// Raw value of a property, `Value::Null` when unset.
    fn load(&self, property: &str) -> Value;

    /// Sets the raw value of a property.
    fn store(&mut self, property: &str, value: Value);

    /// Enumerates a multi-valued property.
    fn values(&self, property: &str) -> Vec<Value> {
        self.load(property).into_list()
    }

    /// Copies every property value into a document.
    fn snapshot(&self) -> Document;

    /// Replaces every property value with the contents of `document`.
    fn restore(&mut self, document: Document);

    /// Downcast support for adapters.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support for adapters.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
