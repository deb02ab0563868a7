//! Concurrency strategies.
//!
//! Both strategies are decorators over an [`EntityStore`](crate::spi::EntityStore)
//! and its store-side units of work:
//!
//! - [`OptimisticLockingStore`] keeps a version per entity in a
//!   [`VersionTable`] and rejects a submit whose entities moved since they
//!   were loaded.
//! - [`PessimisticLockingStore`] takes per-entity locks from a
//!   [`LockTable`] on read and before the first write, and holds them until
//!   the unit of work closes.
//!
//! The tables are process-wide by default and can be injected for
//! isolation. Entries are never evicted.

mod optimistic;
mod pessimistic;

pub use optimistic::{OptimisticLockingStore, VersionTable};
pub use pessimistic::{LockMode, LockTable, LockToken, PessimisticLockingStore};

/// Reader policy of the pessimistic strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockPolicy {
    /// At most one reader; a writer excludes every reader.
    OneReader,
    /// Any number of readers; a writer must be the only reader.
    #[default]
    MultipleReaders,
}
