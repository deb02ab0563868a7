//! Submit and discard lifecycle hooks.

use crate::error::CoreResult;
use crate::uow::UnitOfWork;
use std::fmt;

/// Points in a unit of work's life at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Before the store prepares. Failing aborts the submit.
    BeforePrepare,
    /// After a successful prepare. Failing cancels the prepared batch.
    AfterPrepare,
    /// Immediately before commit. Failing cancels the prepared batch.
    BeforeCommit,
    /// After a successful commit. Failures are logged.
    AfterCommit,
    /// After a discard. Failures are logged.
    AfterDiscard,
}

impl LifecycleEvent {
    /// True if a hook failure at this point aborts the operation.
    pub fn is_abortable(self) -> bool {
        matches!(
            self,
            LifecycleEvent::BeforePrepare | LifecycleEvent::AfterPrepare | LifecycleEvent::BeforeCommit
        )
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::BeforePrepare => "before-prepare",
            LifecycleEvent::AfterPrepare => "after-prepare",
            LifecycleEvent::BeforeCommit => "before-commit",
            LifecycleEvent::AfterCommit => "after-commit",
            LifecycleEvent::AfterDiscard => "after-discard",
        };
        f.write_str(name)
    }
}

/// Callback run at lifecycle events.
///
/// Closures taking `(LifecycleEvent, &UnitOfWork)` implement this trait.
pub trait LifecycleHook: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: LifecycleEvent, unit_of_work: &UnitOfWork) -> CoreResult<()>;
}

impl<F> LifecycleHook for F
where
    F: Fn(LifecycleEvent, &UnitOfWork) -> CoreResult<()> + Send + Sync,
{
    fn on_event(&self, event: LifecycleEvent, unit_of_work: &UnitOfWork) -> CoreResult<()> {
        self(event, unit_of_work)
    }
}
