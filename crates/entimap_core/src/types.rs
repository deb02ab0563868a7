//! Core type definitions for entimap.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a unit of work.
///
/// Ids are allocated from a process-wide counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitOfWorkId(pub u64);

static NEXT_UNIT_OF_WORK_ID: AtomicU64 = AtomicU64::new(1);

impl UnitOfWorkId {
    /// Creates a unit of work id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide id.
    pub(crate) fn next() -> Self {
        Self(NEXT_UNIT_OF_WORK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow:{}", self.0)
    }
}
