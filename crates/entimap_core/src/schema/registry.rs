//! Schema registry built once at startup.

use crate::error::{CoreError, CoreResult};
use crate::schema::EntityDescriptor;
use crate::typed::EntityType;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// All entity types known to a repository.
///
/// Concrete types carry descriptors. Abstract types exist only as names
/// that concrete types implement; queries and association targets may use
/// either.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, Arc<EntityDescriptor>>,
    implementors: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaRegistry {
    /// Starts building a registry.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Descriptor of a concrete type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for abstract or unregistered names.
    pub fn descriptor(&self, name: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    /// True if `name` is a concrete or abstract type.
    pub fn is_known(&self, name: &str) -> bool {
        self.types.contains_key(name) || self.implementors.contains_key(name)
    }

    /// True if entities of `concrete` may be used where `target` is expected.
    pub fn is_assignable(&self, concrete: &str, target: &str) -> bool {
        concrete == target
            || self
                .implementors
                .get(target)
                .is_some_and(|set| set.contains(concrete))
    }

    /// Concrete types assignable to `name`, in name order.
    pub fn concrete_types_of(&self, name: &str) -> Vec<String> {
        let mut types: BTreeSet<String> = self
            .implementors
            .get(name)
            .cloned()
            .unwrap_or_default();
        if self.types.contains_key(name) {
            types.insert(name.to_string());
        }
        types.into_iter().collect()
    }

    /// Registered concrete type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of concrete types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    descriptors: Vec<CoreResult<EntityDescriptor>>,
}

impl SchemaRegistryBuilder {
    /// Adds a concrete type.
    #[must_use]
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(Ok(descriptor));
        self
    }

    /// Adds the descriptor of a typed entity.
    #[must_use]
    pub fn register<T: EntityType>(mut self) -> Self {
        self.descriptors.push(T::descriptor());
        self
    }

    /// Validates and freezes the registry.
    ///
    /// # Errors
    ///
    /// Fails on duplicate type names, on an abstract name that collides
    /// with a concrete one, and on association targets that name no known
    /// type.
    pub fn build(self) -> CoreResult<SchemaRegistry> {
        let mut registry = SchemaRegistry::default();

        for descriptor in self.descriptors {
            let descriptor = descriptor?;
            let name = descriptor.name().to_string();
            for abstract_name in descriptor.implements() {
                registry
                    .implementors
                    .entry(abstract_name.clone())
                    .or_default()
                    .insert(name.clone());
            }
            if registry
                .types
                .insert(name.clone(), Arc::new(descriptor))
                .is_some()
            {
                return Err(CoreError::invalid_schema(format!(
                    "entity type {name} registered twice"
                )));
            }
        }

        for descriptor in registry.types.values() {
            for property in descriptor.properties() {
                if let Some(target) = property.kind().target() {
                    if !registry.is_known(target) {
                        return Err(CoreError::invalid_schema(format!(
                            "property {}.{} targets unknown type {target}",
                            descriptor.name(),
                            property.name()
                        )));
                    }
                }
            }
        }

        Ok(registry)
    }
}
