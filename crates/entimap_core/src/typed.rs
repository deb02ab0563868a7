//! Typed entity wrappers.
//!
//! A typed entity is a thin newtype over [`Entity`] that knows its type
//! name and descriptor. Getters and setters on the newtype forward to the
//! entity's accessors, so every access still runs through the concern
//! chain.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Person(Entity);
//!
//! impl EntityType for Person {
//!     const TYPE_NAME: &'static str = "Person";
//!
//!     fn descriptor() -> CoreResult<EntityDescriptor> {
//!         EntityDescriptor::builder(Self::TYPE_NAME)
//!             .property(PropertyDescriptor::value("name"))
//!             .build()
//!     }
//!
//!     fn wrap(entity: Entity) -> Self {
//!         Person(entity)
//!     }
//!
//!     fn entity(&self) -> &Entity {
//!         &self.0
//!     }
//! }
//!
//! let ann = uow.create::<Person>(|p| p.entity().set("name", "Ann"))?;
//! let again = uow.get::<Person>(ann.entity().id())?;
//! ```

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::schema::EntityDescriptor;
use crate::uow::UnitOfWork;

/// A Rust type standing for one concrete entity type.
pub trait EntityType: Sized {
    /// Registered type name.
    const TYPE_NAME: &'static str;

    /// Describes the type for the schema registry.
    fn descriptor() -> CoreResult<EntityDescriptor>;

    /// Wraps an entity already known to be of this type.
    fn wrap(entity: Entity) -> Self;

    /// The wrapped entity.
    fn entity(&self) -> &Entity;
}

fn wrap_checked<T: EntityType>(unit_of_work: &UnitOfWork, entity: Entity) -> CoreResult<T> {
    if unit_of_work
        .registry()
        .is_assignable(entity.type_name(), T::TYPE_NAME)
    {
        Ok(T::wrap(entity))
    } else {
        Err(CoreError::invalid_operation(format!(
            "entity {} is not a {}",
            entity.reference(),
            T::TYPE_NAME
        )))
    }
}

impl UnitOfWork {
    /// Creates a typed entity with a store-assigned id and runs `init` on
    /// it. A failing `init` leaves nothing behind.
    pub fn create<T, F>(&self, init: F) -> CoreResult<T>
    where
        T: EntityType,
        F: FnOnce(&T) -> CoreResult<()>,
    {
        let mut typed = None;
        self.create_entity_with(T::TYPE_NAME, None, |entity| {
            let wrapped = T::wrap(entity.clone());
            init(&wrapped)?;
            typed = Some(wrapped);
            Ok(())
        })?;
        typed.ok_or_else(|| CoreError::invalid_operation("typed entity was not created"))
    }

    /// Looks a typed entity up by id.
    pub fn get<T: EntityType>(&self, id: &EntityId) -> CoreResult<Option<T>> {
        self.entity(T::TYPE_NAME, id)?
            .map(|entity| wrap_checked(self, entity))
            .transpose()
    }
}

impl Query {
    /// Runs the query and wraps each result.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if a result is not assignable to `T`.
    pub fn list_as<T: EntityType>(&self) -> CoreResult<Vec<T>> {
        let unit_of_work = self.unit_of_work();
        self.list()?
            .into_iter()
            .map(|entity| wrap_checked(unit_of_work, entity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::VersionTable;
    use crate::query::expr;
    use crate::repository::Repository;
    use crate::schema::{PropertyDescriptor, SchemaRegistry};

    #[derive(Debug)]
    struct Book(Entity);

    impl Book {
        fn title(&self) -> CoreResult<String> {
            self.0.property("title")?.get_as()
        }

        fn set_title(&self, title: &str) -> CoreResult<()> {
            self.0.set("title", title)
        }
    }

    impl EntityType for Book {
        const TYPE_NAME: &'static str = "Book";

        fn descriptor() -> CoreResult<EntityDescriptor> {
            EntityDescriptor::builder(Self::TYPE_NAME)
                .property(PropertyDescriptor::value("title"))
                .build()
        }

        fn wrap(entity: Entity) -> Self {
            Book(entity)
        }

        fn entity(&self) -> &Entity {
            &self.0
        }
    }

    fn repository() -> Repository {
        let registry = SchemaRegistry::builder().register::<Book>().build().unwrap();
        Repository::builder(registry)
            .version_table(VersionTable::new())
            .build()
            .unwrap()
    }

    #[test]
    fn create_and_get() {
        let uow = repository().new_unit_of_work().unwrap();
        let book = uow.create::<Book, _>(|b| b.set_title("Dune")).unwrap();
        assert_eq!(book.title().unwrap(), "Dune");

        let found = uow.get::<Book>(book.entity().id()).unwrap().unwrap();
        assert!(found.entity().ptr_eq(book.entity()));
        assert!(uow.get::<Book>(&EntityId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn failed_init_leaves_nothing() {
        let uow = repository().new_unit_of_work().unwrap();
        let result = uow.create::<Book, _>(|b| b.entity().set("title", entimap_codec::Value::Null));
        assert!(matches!(result, Err(CoreError::NotNullable { .. })));
        assert!(uow.modified_entities().is_empty());
    }

    #[test]
    fn typed_query() {
        let uow = repository().new_unit_of_work().unwrap();
        uow.create::<Book, _>(|b| b.set_title("Dune")).unwrap();
        uow.create::<Book, _>(|b| b.set_title("Emma")).unwrap();

        let books = uow
            .query(Book::TYPE_NAME)
            .unwrap()
            .filter(expr::eq("title", "Emma"))
            .list_as::<Book>()
            .unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title().unwrap(), "Emma");
    }
}
