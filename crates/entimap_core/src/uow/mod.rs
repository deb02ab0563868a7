//! Unit-of-work engine.
//!
//! A [`UnitOfWork`] is a transactional scope over a store. It keeps:
//!
//! - an identity cache (`id -> weak entity`) so that every lookup path
//!   returns the same instance for the same id,
//! - a modified set (`id -> entity`, strong) holding exactly the created,
//!   modified and removed entities that the next submit will hand to the
//!   store,
//! - the store-side unit of work, possibly wrapped by a locking strategy,
//! - an optional parent, for nested scopes.
//!
//! Every entity in the modified set is also in the identity cache.
//!
//! ## Lock order
//!
//! entity state lock, then the store-side unit of work. Nothing holds the
//! store lock while calling into entities, hooks or a committer.

mod engine;
mod lifecycle;
mod nested;

pub use lifecycle::{LifecycleEvent, LifecycleHook};

use crate::entity::{Entity, EntityId, EntityInner};
use crate::error::{CoreError, CoreResult};
use crate::repository::RepositoryShared;
use crate::schema::SchemaRegistry;
use crate::spi::StoreUnitOfWork;
use crate::types::UnitOfWorkId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) struct UnitOfWorkInner {
    id: UnitOfWorkId,
    shared: Arc<RepositoryShared>,
    store: Mutex<Box<dyn StoreUnitOfWork>>,
    identity: RwLock<HashMap<EntityId, Weak<EntityInner>>>,
    modified: Mutex<BTreeMap<EntityId, Entity>>,
    parent: Option<UnitOfWork>,
    open: AtomicBool,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
}

impl UnitOfWorkInner {
    pub(crate) fn id(&self) -> UnitOfWorkId {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Detaches every cached entity and releases the store side.
    fn release(&self) {
        let cached: Vec<Entity> = self
            .identity
            .write()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade().map(Entity::from_inner))
            .collect();
        for entity in &cached {
            entity.detach();
        }
        self.modified.lock().clear();
        self.store.lock().close();
        self.shared.stats.record_unit_closed();
        debug!(unit_of_work = %self.id, detached = cached.len(), "unit of work closed");
    }
}

impl Drop for UnitOfWorkInner {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.release();
        }
    }
}

/// A transactional scope with identity-cached access to entities.
///
/// Handles are cheap to clone and share one scope. The scope closes when
/// [`close`](Self::close) is called or the last handle is dropped; closing
/// detaches every entity it handed out.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<UnitOfWorkInner>,
}

impl UnitOfWork {
    pub(crate) fn open(
        shared: Arc<RepositoryShared>,
        store: Box<dyn StoreUnitOfWork>,
        parent: Option<UnitOfWork>,
    ) -> Self {
        let inner = Arc::new(UnitOfWorkInner {
            id: UnitOfWorkId::next(),
            shared,
            store: Mutex::new(store),
            identity: RwLock::new(HashMap::new()),
            modified: Mutex::new(BTreeMap::new()),
            parent,
            open: AtomicBool::new(true),
            hooks: RwLock::new(Vec::new()),
        });
        inner.shared.stats.record_unit_opened();
        debug!(
            unit_of_work = %inner.id,
            repository = %inner.shared.config.name,
            nested = inner.parent.is_some(),
            "unit of work opened"
        );
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<UnitOfWorkInner>) -> Self {
        Self { inner }
    }

    /// Unit of work id.
    pub fn id(&self) -> UnitOfWorkId {
        self.inner.id
    }

    /// True until closed.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Enclosing scope of a nested unit of work.
    pub fn parent(&self) -> Option<UnitOfWork> {
        self.inner.parent.clone()
    }

    /// Registered entity types.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.shared.registry
    }

    /// Registers a hook for this unit of work only.
    pub fn add_hook(&self, hook: impl LifecycleHook + 'static) {
        self.inner.hooks.write().push(Arc::new(hook));
    }

    /// Entities the next submit will hand to the store.
    pub fn modified_entities(&self) -> Vec<Entity> {
        self.inner.modified.lock().values().cloned().collect()
    }

    /// Entities currently in the identity cache.
    pub fn cached_entities(&self) -> Vec<Entity> {
        self.inner
            .identity
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .map(Entity::from_inner)
            .collect()
    }

    /// Closes the scope: detaches every cached entity, releases held
    /// locks and the store-side unit of work. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            self.inner.release();
        }
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.inner.is_open() {
            Ok(())
        } else {
            Err(CoreError::UnitOfWorkClosed { id: self.inner.id })
        }
    }

    pub(crate) fn same_as(&self, other: &UnitOfWork) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for UnitOfWork {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for UnitOfWork {}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("modified", &self.inner.modified.lock().len())
            .field("nested", &self.inner.parent.is_some())
            .finish()
    }
}
