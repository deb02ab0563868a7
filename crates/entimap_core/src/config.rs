//! Repository configuration.

use crate::locking::LockPolicy;
use std::time::Duration;

/// Concurrency strategy wrapped around the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingMode {
    /// No concurrency control; last submit wins.
    None,
    /// Version counters checked at submit.
    #[default]
    Optimistic,
    /// Per-entity locks acquired on read and before the first write.
    Pessimistic(LockPolicy),
}

/// Configuration for building a repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Name used in logs and passed to the store on init.
    pub name: String,

    /// Concurrency strategy.
    pub locking: LockingMode,

    /// Upper bound on a pessimistic lock wait. `None` waits forever.
    pub lock_timeout: Option<Duration>,

    /// Identity cache size after which entries for dropped entities are
    /// swept on the next insert.
    pub identity_prune_threshold: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            locking: LockingMode::Optimistic,
            lock_timeout: Some(Duration::from_secs(30)),
            identity_prune_threshold: 1024,
        }
    }
}

impl RepositoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the repository name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the concurrency strategy.
    #[must_use]
    pub const fn locking(mut self, locking: LockingMode) -> Self {
        self.locking = locking;
        self
    }

    /// Sets the pessimistic lock wait bound.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the identity cache sweep threshold.
    #[must_use]
    pub const fn identity_prune_threshold(mut self, threshold: usize) -> Self {
        self.identity_prune_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RepositoryConfig::default();
        assert_eq!(config.locking, LockingMode::Optimistic);
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.name, "default");
    }

    #[test]
    fn builder_pattern() {
        let config = RepositoryConfig::new()
            .name("orders")
            .locking(LockingMode::Pessimistic(LockPolicy::OneReader))
            .lock_timeout(None)
            .identity_prune_threshold(16);

        assert_eq!(config.name, "orders");
        assert_eq!(
            config.locking,
            LockingMode::Pessimistic(LockPolicy::OneReader)
        );
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.identity_prune_threshold, 16);
    }
}
