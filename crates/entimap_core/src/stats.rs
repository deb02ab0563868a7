//! Repository statistics.
//!
//! Counters are shared by every unit of work a repository opens.
//!
//! # Usage
//!
//! ```rust,ignore
//! let repository = Repository::builder(registry).build()?;
//! let uow = repository.new_unit_of_work()?;
//! // ...
//! let stats = repository.stats().snapshot();
//! println!("cache hits: {}", stats.cache_hits);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Repository statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct RepositoryStats {
    units_opened: AtomicU64,
    units_closed: AtomicU64,
    entities_created: AtomicU64,
    entities_loaded: AtomicU64,
    entities_removed: AtomicU64,
    cache_hits: AtomicU64,
    queries: AtomicU64,
    submits: AtomicU64,
    submit_failures: AtomicU64,
    discards: AtomicU64,
    reloads: AtomicU64,
}

impl RepositoryStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_unit_opened(&self) {
        self.units_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unit_closed(&self) {
        self.units_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_create(&self) {
        self.entities_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.entities_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.entities_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submit(&self) {
        self.submits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submit_failure(&self) {
        self.submit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of units of work opened.
    pub fn units_opened(&self) -> u64 {
        self.units_opened.load(Ordering::Relaxed)
    }

    /// Returns the number of units of work closed.
    pub fn units_closed(&self) -> u64 {
        self.units_closed.load(Ordering::Relaxed)
    }

    /// Returns the number of entities created.
    pub fn entities_created(&self) -> u64 {
        self.entities_created.load(Ordering::Relaxed)
    }

    /// Returns the number of entity states loaded from the store.
    pub fn entities_loaded(&self) -> u64 {
        self.entities_loaded.load(Ordering::Relaxed)
    }

    /// Returns the number of entities marked removed.
    pub fn entities_removed(&self) -> u64 {
        self.entities_removed.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups answered from the identity cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of executed queries.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Returns the number of successful submits.
    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::Relaxed)
    }

    /// Returns the number of failed submits.
    pub fn submit_failures(&self) -> u64 {
        self.submit_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of discards.
    pub fn discards(&self) -> u64 {
        self.discards.load(Ordering::Relaxed)
    }

    /// Returns the number of single-entity reloads.
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            units_opened: self.units_opened(),
            units_closed: self.units_closed(),
            entities_created: self.entities_created(),
            entities_loaded: self.entities_loaded(),
            entities_removed: self.entities_removed(),
            cache_hits: self.cache_hits(),
            queries: self.queries(),
            submits: self.submits(),
            submit_failures: self.submit_failures(),
            discards: self.discards(),
            reloads: self.reloads(),
        }
    }
}

/// A point-in-time snapshot of repository statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Units of work opened.
    pub units_opened: u64,
    /// Units of work closed.
    pub units_closed: u64,
    /// Entities created.
    pub entities_created: u64,
    /// Entity states loaded from the store.
    pub entities_loaded: u64,
    /// Entities marked removed.
    pub entities_removed: u64,
    /// Lookups answered from the identity cache.
    pub cache_hits: u64,
    /// Executed queries.
    pub queries: u64,
    /// Successful submits.
    pub submits: u64,
    /// Failed submits.
    pub submit_failures: u64,
    /// Discards.
    pub discards: u64,
    /// Single-entity reloads.
    pub reloads: u64,
}
