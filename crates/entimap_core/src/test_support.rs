//! Shared fixtures for unit tests.

use crate::locking::VersionTable;
use crate::property::InvocationCounter;
use crate::repository::Repository;
use crate::schema::{EntityDescriptor, PropertyDescriptor, SchemaRegistry};
use crate::store::MemoryStore;
use entimap_codec::Value;
use std::sync::Arc;

fn person() -> EntityDescriptor {
    EntityDescriptor::builder("Person")
        .implements("Nameable")
        .property(PropertyDescriptor::value("name"))
        .property(PropertyDescriptor::value("age").default_value(0i64))
        .property(PropertyDescriptor::value("nickname").optional())
        .property(PropertyDescriptor::set("tags"))
        .property(PropertyDescriptor::list("scores"))
        .property(PropertyDescriptor::value("ssn").optional().immutable())
        .property(PropertyDescriptor::computed("greeting", |entity| {
            let name = entity.get("name")?;
            Ok(Value::from(format!("Hello, {}", name.as_text().unwrap_or_default())))
        }))
        .property(PropertyDescriptor::association("home", "Address").optional())
        .property(PropertyDescriptor::many_association("friends", "Person"))
        .build()
        .unwrap()
}

fn address() -> EntityDescriptor {
    EntityDescriptor::builder("Address")
        .property(PropertyDescriptor::value("city").optional())
        .build()
        .unwrap()
}

/// Person and Address, with Person implementing Nameable.
pub(crate) fn sample_registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .entity(person())
        .entity(address())
        .build()
        .unwrap()
}

/// A single type whose `value` property counts its traffic.
pub(crate) fn counted_registry() -> (SchemaRegistry, Arc<InvocationCounter>) {
    let counter = Arc::new(InvocationCounter::new());
    let registry = SchemaRegistry::builder()
        .entity(
            EntityDescriptor::builder("Counted")
                .property(
                    PropertyDescriptor::value("value")
                        .optional()
                        .shared_concern(counter.clone()),
                )
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    (registry, counter)
}

/// Optimistic repository over a fresh memory store and version table.
pub(crate) fn repository(registry: SchemaRegistry) -> Repository {
    Repository::builder(registry)
        .store(MemoryStore::new())
        .version_table(VersionTable::new())
        .build()
        .unwrap()
}
