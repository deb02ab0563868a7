//! Collection property accessor.

use crate::entity::Entity;
use crate::error::CoreResult;
use crate::schema::{CollectionKind, PropertyDescriptor, PropertyKind};
use entimap_codec::Value;

/// List or set of raw values held by one property.
#[derive(Debug, Clone)]
pub struct CollectionProperty {
    entity: Entity,
    index: usize,
}

impl CollectionProperty {
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

    /// List or set.
    pub fn kind(&self) -> CollectionKind {
        match self.descriptor().kind() {
            PropertyKind::Collection(kind) => *kind,
            _ => CollectionKind::List,
        }
    }

    /// Current elements in order.
    pub fn get(&self) -> CoreResult<Vec<Value>> {
        Ok(self.entity.read_property(self.index)?.into_list())
    }

    /// Number of elements.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.get()?.len())
    }

    /// True if there are no elements.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.get()?.is_empty())
    }

    /// True if `value` is an element.
    pub fn contains(&self, value: &Value) -> CoreResult<bool> {
        Ok(self.get()?.contains(value))
    }

    /// Appends a value. Sets ignore values already present.
    ///
    /// Returns true if the collection changed.
    pub fn add(&self, value: impl Into<Value>) -> CoreResult<bool> {
        let value = value.into();
        let mut elements = self.get()?;
        if self.kind() == CollectionKind::Set && elements.contains(&value) {
            return Ok(false);
        }
        elements.push(value);
        self.write(elements)?;
        Ok(true)
    }

    /// Removes the first occurrence of `value`.
    ///
    /// Returns true if the collection changed.
    pub fn remove(&self, value: &Value) -> CoreResult<bool> {
        let mut elements = self.get()?;
        let Some(position) = elements.iter().position(|e| e == value) else {
            return Ok(false);
        };
        elements.remove(position);
        self.write(elements)?;
        Ok(true)
    }

    /// Replaces every element. Sets keep the first of any duplicates.
    pub fn set<I, V>(&self, values: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut elements: Vec<Value> = Vec::new();
        for value in values {
            let value = value.into();
            if self.kind() == CollectionKind::Set && elements.contains(&value) {
                continue;
            }
            elements.push(value);
        }
        self.write(elements)
    }

    /// Removes every element.
    pub fn clear(&self) -> CoreResult<()> {
        self.write(Vec::new())
    }

    fn write(&self, elements: Vec<Value>) -> CoreResult<()> {
        self.entity.write_property(self.index, Value::List(elements))
    }
}
