//! Repository: the entry point tying a schema, a store and a locking
//! strategy together.

use crate::config::{LockingMode, RepositoryConfig};
use crate::error::{CoreError, CoreResult};
use crate::locking::{LockTable, OptimisticLockingStore, PessimisticLockingStore, VersionTable};
use crate::schema::SchemaRegistry;
use crate::spi::{EntityStore, StoreContext};
use crate::stats::RepositoryStats;
use crate::store::MemoryStore;
use crate::uow::{LifecycleHook, UnitOfWork};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by a repository and every unit of work it opens.
pub(crate) struct RepositoryShared {
    pub(crate) config: RepositoryConfig,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) store: Arc<dyn EntityStore>,
    pub(crate) stats: Arc<RepositoryStats>,
    pub(crate) hooks: Vec<Arc<dyn LifecycleHook>>,
}

/// Builder for [`Repository`].
pub struct RepositoryBuilder {
    registry: Arc<SchemaRegistry>,
    store: Option<Arc<dyn EntityStore>>,
    config: RepositoryConfig,
    hooks: Vec<Arc<dyn LifecycleHook>>,
    versions: Option<VersionTable>,
    locks: Option<LockTable>,
}

impl RepositoryBuilder {
    /// Sets the store. Defaults to an empty [`MemoryStore`].
    #[must_use]
    pub fn store(mut self, store: impl EntityStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets a store shared with other owners.
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a hook run for every unit of work.
    #[must_use]
    pub fn hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Uses this version table instead of the process-wide one.
    #[must_use]
    pub fn version_table(mut self, versions: VersionTable) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Uses this lock table instead of the process-wide one.
    #[must_use]
    pub fn lock_table(mut self, locks: LockTable) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Wraps the store in the configured locking strategy and initialises
    /// it.
    pub fn build(self) -> CoreResult<Repository> {
        let config = self.config;
        let base: Arc<dyn EntityStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let store: Arc<dyn EntityStore> = match config.locking {
            LockingMode::None => base,
            LockingMode::Optimistic => Arc::new(OptimisticLockingStore::new(
                base,
                self.versions.unwrap_or_else(VersionTable::global),
            )),
            LockingMode::Pessimistic(policy) => Arc::new(PessimisticLockingStore::new(
                base,
                self.locks.unwrap_or_else(LockTable::global),
                policy,
                config.lock_timeout,
            )),
        };

        store.init(&StoreContext::new(Arc::clone(&self.registry), config.name.clone()))?;
        info!(
            repository = %config.name,
            locking = ?config.locking,
            types = self.registry.len(),
            "repository ready"
        );

        Ok(Repository {
            shared: Arc::new(RepositoryShared {
                config,
                registry: self.registry,
                store,
                stats: Arc::new(RepositoryStats::new()),
                hooks: self.hooks,
            }),
            open: RwLock::new(true),
        })
    }
}

/// A configured store with a schema, from which units of work are opened.
pub struct Repository {
    shared: Arc<RepositoryShared>,
    open: RwLock<bool>,
}

impl Repository {
    /// Starts building a repository over `registry`.
    pub fn builder(registry: impl Into<Arc<SchemaRegistry>>) -> RepositoryBuilder {
        RepositoryBuilder {
            registry: registry.into(),
            store: None,
            config: RepositoryConfig::default(),
            hooks: Vec::new(),
            versions: None,
            locks: None,
        }
    }

    /// Opens a unit of work.
    pub fn new_unit_of_work(&self) -> CoreResult<UnitOfWork> {
        self.ensure_open()?;
        let store = self.shared.store.create_unit_of_work()?;
        Ok(UnitOfWork::open(Arc::clone(&self.shared), store, None))
    }

    /// Repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Registered types.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.shared.registry
    }

    /// Counters shared by every unit of work.
    #[must_use]
    pub fn stats(&self) -> &RepositoryStats {
        &self.shared.stats
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.shared.config
    }

    /// Closes the store. Open units of work keep working against their
    /// store-side handles; no new ones can be opened.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.open.write();
        if !*is_open {
            return Ok(());
        }
        self.shared.store.close()?;
        *is_open = false;
        debug!(repository = %self.shared.config.name, "repository closed");
        Ok(())
    }

    /// True until closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "repository {} is closed",
                self.shared.config.name
            )))
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name())
            .field("locking", &self.shared.config.locking)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::test_support::sample_registry;
    use crate::uow::LifecycleEvent;
    use parking_lot::Mutex;

    #[test]
    fn store_is_initialised_with_repository_name() {
        let memory = MemoryStore::new();
        let repo = Repository::builder(sample_registry())
            .store(memory.clone())
            .config(RepositoryConfig::new().name("people").locking(LockingMode::None))
            .build()
            .unwrap();
        assert_eq!(repo.name(), "people");
        assert_eq!(memory.repository().as_deref(), Some("people"));
        assert!(repo.registry().is_known("Person"));
    }

    #[test]
    fn closed_repository_opens_no_units() {
        let repo = Repository::builder(sample_registry())
            .version_table(VersionTable::new())
            .build()
            .unwrap();
        let uow = repo.new_unit_of_work().unwrap();
        repo.close().unwrap();
        repo.close().unwrap();
        assert!(!repo.is_open());
        assert!(matches!(
            repo.new_unit_of_work(),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(uow.is_open());
    }

    #[test]
    fn stats_follow_unit_of_work_activity() {
        let repo = Repository::builder(sample_registry())
            .version_table(VersionTable::new())
            .build()
            .unwrap();
        let uow = repo.new_unit_of_work().unwrap();
        let person = uow.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();
        uow.submit().unwrap();
        uow.entity("Person", person.id()).unwrap();
        uow.query("Person").unwrap().list().unwrap();
        uow.close();

        let stats = repo.stats().snapshot();
        assert_eq!(stats.units_opened, 1);
        assert_eq!(stats.units_closed, 1);
        assert_eq!(stats.entities_created, 1);
        assert_eq!(stats.submits, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.queries, 1);
    }

    #[test]
    fn repository_hooks_run_before_unit_hooks() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let repo = Repository::builder(sample_registry())
            .version_table(VersionTable::new())
            .hook(move |event: LifecycleEvent, _: &UnitOfWork| {
                seen.lock().push(format!("repo:{event}"));
                Ok(())
            })
            .build()
            .unwrap();

        let uow = repo.new_unit_of_work().unwrap();
        let seen = Arc::clone(&events);
        uow.add_hook(move |event: LifecycleEvent, _: &UnitOfWork| {
            seen.lock().push(format!("uow:{event}"));
            Ok(())
        });
        uow.submit().unwrap();

        let events = events.lock();
        assert_eq!(
            events.as_slice(),
            [
                "repo:before-prepare",
                "uow:before-prepare",
                "repo:after-prepare",
                "uow:after-prepare",
                "repo:before-commit",
                "uow:before-commit",
                "repo:after-commit",
                "uow:after-commit",
            ]
        );
    }

    #[test]
    fn pessimistic_mode_uses_injected_table() {
        let locks = LockTable::new();
        let repo = Repository::builder(sample_registry())
            .config(RepositoryConfig::new().locking(LockingMode::Pessimistic(
                crate::locking::LockPolicy::MultipleReaders,
            )))
            .lock_table(locks.clone())
            .build()
            .unwrap();

        let setup = repo.new_unit_of_work().unwrap();
        let person = setup.create_entity("Person", None).unwrap();
        person.set("name", "Ann").unwrap();
        setup.submit().unwrap();
        setup.close();

        let uow = repo.new_unit_of_work().unwrap();
        let loaded = uow.entity("Person", person.id()).unwrap().unwrap();
        let reference = loaded.reference();
        assert_eq!(locks.reader_count(&reference), 1);
        loaded.set("name", "Bea").unwrap();
        assert!(locks.is_write_locked(&reference));
        uow.close();
        assert!(!locks.is_write_locked(&reference));
        assert_eq!(locks.reader_count(&reference), 0);
    }
}
