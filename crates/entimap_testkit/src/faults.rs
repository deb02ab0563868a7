//! Fault injection for store adapters.
//!
//! [`FaultyStore`] decorates any [`EntityStore`] and fails chosen
//! operations on demand, so tests can check that the engine leaves the
//! store and the unit of work consistent when a backend errors mid-submit.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entimap_testkit::faults::{Fault, FaultyStore};
//!
//! let store = FaultyStore::new(MemoryStore::new());
//! let faults = store.plan();
//! let repo = Repository::builder(registry).store(store).build()?;
//!
//! faults.arm(Fault::Commit, 1);
//! assert!(uow.submit().is_err());
//! ```

use entimap_codec::Document;
use entimap_core::error::{CoreError, CoreResult};
use entimap_core::spi::{
    EntityStore, LockOutcome, StateChange, StateCommitter, StateRollback, StateStream,
    StoreContext, StoreQuery, StoreUnitOfWork, SubmitResult,
};
use entimap_core::state::CompositeState;
use entimap_core::EntityId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `load_entity_state`.
    Load,
    /// `execute_query`.
    Query,
    /// `prepare`.
    Prepare,
    /// `StateCommitter::commit`.
    Commit,
    /// `rollback`.
    Rollback,
}

impl Fault {
    fn index(self) -> usize {
        match self {
            Fault::Load => 0,
            Fault::Query => 1,
            Fault::Prepare => 2,
            Fault::Commit => 3,
            Fault::Rollback => 4,
        }
    }
}

/// Pending failures, shared by a store and every unit of work it opens.
#[derive(Debug, Default)]
pub struct FaultPlan {
    armed: [AtomicUsize; 5],
    fired: AtomicUsize,
}

impl FaultPlan {
    /// Makes the next `times` calls of `fault` fail.
    pub fn arm(&self, fault: Fault, times: usize) {
        self.armed[fault.index()].store(times, Ordering::SeqCst);
    }

    /// Cancels every armed failure.
    pub fn disarm(&self) {
        for slot in &self.armed {
            slot.store(0, Ordering::SeqCst);
        }
    }

    /// Number of failures injected so far.
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }

    fn check(&self, fault: Fault) -> CoreResult<()> {
        let slot = &self.armed[fault.index()];
        let taken = slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.fired.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(?fault, "injecting store failure");
            Err(CoreError::store(format!("injected {fault:?} failure")))
        } else {
            Ok(())
        }
    }
}

/// Store decorator failing armed operations.
pub struct FaultyStore {
    inner: Arc<dyn EntityStore>,
    plan: Arc<FaultPlan>,
}

impl FaultyStore {
    /// Wraps a store with nothing armed.
    pub fn new(inner: impl EntityStore + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            plan: Arc::new(FaultPlan::default()),
        }
    }

    /// Handle for arming failures after the store is handed over.
    pub fn plan(&self) -> Arc<FaultPlan> {
        Arc::clone(&self.plan)
    }
}

impl EntityStore for FaultyStore {
    fn init(&self, context: &StoreContext) -> CoreResult<()> {
        self.inner.init(context)
    }

    fn create_unit_of_work(&self) -> CoreResult<Box<dyn StoreUnitOfWork>> {
        Ok(Box::new(FaultyUnitOfWork {
            inner: self.inner.create_unit_of_work()?,
            plan: Arc::clone(&self.plan),
        }))
    }

    fn state_id(&self, raw: &Document) -> CoreResult<EntityId> {
        self.inner.state_id(raw)
    }

    fn close(&self) -> CoreResult<()> {
        self.inner.close()
    }
}

struct FaultyUnitOfWork {
    inner: Box<dyn StoreUnitOfWork>,
    plan: Arc<FaultPlan>,
}

impl StoreUnitOfWork for FaultyUnitOfWork {
    fn load_entity_state(
        &mut self,
        id: &EntityId,
        entity_type: &str,
    ) -> CoreResult<Option<Box<dyn CompositeState>>> {
        self.plan.check(Fault::Load)?;
        self.inner.load_entity_state(id, entity_type)
    }

    fn new_entity_state(
        &mut self,
        id: Option<&EntityId>,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.inner.new_entity_state(id, entity_type)
    }

    fn adopt_entity_state(
        &mut self,
        raw: Document,
        entity_type: &str,
    ) -> CoreResult<Box<dyn CompositeState>> {
        self.inner.adopt_entity_state(raw, entity_type)
    }

    fn execute_query(&mut self, query: &StoreQuery) -> CoreResult<StateStream> {
        self.plan.check(Fault::Query)?;
        self.inner.execute_query(query)
    }

    fn state_bound(&mut self, id: &EntityId) {
        self.inner.state_bound(id);
    }

    fn prepare(&mut self, changes: &[StateChange<'_>]) -> CoreResult<Box<dyn StateCommitter>> {
        self.plan.check(Fault::Prepare)?;
        let inner = self.inner.prepare(changes)?;
        Ok(Box::new(FaultyCommitter {
            inner,
            plan: Arc::clone(&self.plan),
        }))
    }

    fn rollback(&mut self, targets: &mut [StateRollback<'_>]) -> CoreResult<Vec<EntityId>> {
        self.plan.check(Fault::Rollback)?;
        self.inner.rollback(targets)
    }

    fn supports_cloning(&self) -> bool {
        self.inner.supports_cloning()
    }

    fn clone_entity_state(&self, state: &dyn CompositeState) -> CoreResult<Box<dyn CompositeState>> {
        self.inner.clone_entity_state(state)
    }

    fn reincorporate_entity_state(
        &self,
        target: &mut dyn CompositeState,
        source: &dyn CompositeState,
    ) -> CoreResult<()> {
        self.inner.reincorporate_entity_state(target, source)
    }

    fn before_modify(&mut self, id: &EntityId, entity_type: &str) -> CoreResult<LockOutcome> {
        self.inner.before_modify(id, entity_type)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct FaultyCommitter {
    inner: Box<dyn StateCommitter>,
    plan: Arc<FaultPlan>,
}

impl StateCommitter for FaultyCommitter {
    fn commit(self: Box<Self>) -> CoreResult<SubmitResult> {
        if let Err(e) = self.plan.check(Fault::Commit) {
            self.inner.cancel();
            return Err(e);
        }
        self.inner.commit()
    }

    fn cancel(self: Box<Self>) {
        self.inner.cancel();
    }
}
