//! Test fixtures and repository helpers.
//!
//! Provides a small people/address schema and repositories over a fresh
//! memory store with private locking tables, so tests never share state
//! through the process-wide tables.

use entimap_codec::Value;
use entimap_core::{
    CoreResult, Entity, EntityDescriptor, EntityId, LockPolicy, LockTable, LockingMode,
    MemoryStore, PropertyDescriptor, Repository, RepositoryConfig, SchemaRegistry, UnitOfWork,
    VersionTable,
};
use std::time::Duration;

/// Person, Address and Pet. Person and Pet implement `Named`.
///
/// Person declares `name` (required), `age` (default 0), `nickname`
/// (optional), `tags` (set), `scores` (list), `home` (optional association
/// to Address) and `friends` (many-association to Person).
pub fn people_registry() -> SchemaRegistry {
    let build = || -> CoreResult<SchemaRegistry> {
        SchemaRegistry::builder()
            .entity(
                EntityDescriptor::builder("Person")
                    .implements("Named")
                    .property(PropertyDescriptor::value("name"))
                    .property(PropertyDescriptor::value("age").default_value(0i64))
                    .property(PropertyDescriptor::value("nickname").optional())
                    .property(PropertyDescriptor::set("tags"))
                    .property(PropertyDescriptor::list("scores"))
                    .property(PropertyDescriptor::association("home", "Address").optional())
                    .property(PropertyDescriptor::many_association("friends", "Person"))
                    .build()?,
            )
            .entity(
                EntityDescriptor::builder("Address")
                    .property(PropertyDescriptor::value("city").optional())
                    .build()?,
            )
            .entity(
                EntityDescriptor::builder("Pet")
                    .implements("Named")
                    .property(PropertyDescriptor::value("name"))
                    .build()?,
            )
            .build()
    };
    build().expect("people schema is valid")
}

/// A repository over a memory store with private locking tables.
pub struct TestRepository {
    /// The repository instance.
    pub repository: Repository,
    store: MemoryStore,
    versions: VersionTable,
    locks: LockTable,
}

impl TestRepository {
    /// Optimistic locking.
    pub fn optimistic() -> Self {
        Self::with_config(RepositoryConfig::new().locking(LockingMode::Optimistic))
    }

    /// Pessimistic locking with a short wait bound.
    pub fn pessimistic(policy: LockPolicy) -> Self {
        Self::with_config(
            RepositoryConfig::new()
                .locking(LockingMode::Pessimistic(policy))
                .lock_timeout(Some(Duration::from_secs(5))),
        )
    }

    /// No concurrency control.
    pub fn unlocked() -> Self {
        Self::with_config(RepositoryConfig::new().locking(LockingMode::None))
    }

    /// Any configuration over [`people_registry`].
    pub fn with_config(config: RepositoryConfig) -> Self {
        let store = MemoryStore::new();
        let versions = VersionTable::new();
        let locks = LockTable::new();
        let repository = Repository::builder(people_registry())
            .store(store.clone())
            .config(config)
            .version_table(versions.clone())
            .lock_table(locks.clone())
            .build()
            .expect("Failed to build test repository");
        Self {
            repository,
            store,
            versions,
            locks,
        }
    }

    /// The underlying memory store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Version table used in optimistic mode.
    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }

    /// Lock table used in pessimistic mode.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Commits one person per name and returns their ids in order.
    pub fn seed_people(&self, names: &[&str]) -> Vec<EntityId> {
        with_unit_of_work(&self.repository, |uow| {
            let ids = names
                .iter()
                .enumerate()
                .map(|(age, name)| person(uow, name, age as i64).id().clone())
                .collect();
            uow.submit()?;
            Ok(ids)
        })
        .expect("Failed to seed people")
    }
}

impl std::ops::Deref for TestRepository {
    type Target = Repository;

    fn deref(&self) -> &Self::Target {
        &self.repository
    }
}

/// Runs `f` in a fresh unit of work that is closed afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use entimap_testkit::{with_unit_of_work, TestRepository};
///
/// let repo = TestRepository::optimistic();
/// with_unit_of_work(&repo, |uow| {
///     uow.create_entity("Address", None)?;
///     uow.submit()?;
///     Ok(())
/// })
/// .unwrap();
/// ```
pub fn with_unit_of_work<F, R>(repository: &Repository, f: F) -> CoreResult<R>
where
    F: FnOnce(&UnitOfWork) -> CoreResult<R>,
{
    let uow = repository.new_unit_of_work()?;
    let result = f(&uow);
    uow.close();
    result
}

/// Creates a person with a name and an age.
pub fn person(uow: &UnitOfWork, name: &str, age: i64) -> Entity {
    uow.create_entity_with("Person", None, |p| {
        p.set("name", name)?;
        p.set("age", age)
    })
    .expect("Failed to create person")
}

/// Creates an address in a city.
pub fn address(uow: &UnitOfWork, city: &str) -> Entity {
    uow.create_entity_with("Address", None, |a| a.set("city", city))
        .expect("Failed to create address")
}

/// Reads a text property, panicking on anything else.
pub fn text(entity: &Entity, property: &str) -> String {
    match entity.get(property).expect("Failed to read property") {
        Value::Text(text) => text,
        other => panic!("{property} is {other:?}, not text"),
    }
}
