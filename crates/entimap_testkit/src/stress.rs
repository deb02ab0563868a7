//! Concurrent stress drivers.
//!
//! Each driver runs worker threads that open their own units of work
//! against one repository and increment a shared counter entity. The final
//! counter value shows whether any update was lost.

use entimap_codec::Value;
use entimap_core::{CoreError, CoreResult, EntityId, Repository};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Increments that were committed.
    pub committed: usize,
    /// Submits rejected with a concurrent modification and retried.
    pub conflicts: usize,
    /// Operations that failed for any other reason.
    pub failed: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Increments per thread.
    pub increments: usize,
    /// Give up on an increment after this many conflicts.
    pub max_retries: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            increments: 25,
            max_retries: 1_000,
        }
    }
}

/// Commits a person used as a counter through its `age` and returns its id.
pub fn seed_counter(repository: &Repository) -> CoreResult<EntityId> {
    let uow = repository.new_unit_of_work()?;
    let counter = uow.create_entity_with("Person", None, |p| {
        p.set("name", "counter")?;
        p.set("age", 0i64)
    })?;
    uow.submit()?;
    let id = counter.id().clone();
    uow.close();
    Ok(id)
}

/// Reads the committed counter value.
pub fn read_counter(repository: &Repository, id: &EntityId) -> CoreResult<i64> {
    let uow = repository.new_unit_of_work()?;
    let value = match uow.entity("Person", id)? {
        Some(counter) => counter.get("age")?,
        None => Value::Null,
    };
    uow.close();
    value
        .as_integer()
        .ok_or_else(|| CoreError::invalid_operation(format!("counter {id} is missing")))
}

fn increment_once(repository: &Repository, id: &EntityId) -> CoreResult<()> {
    let uow = repository.new_unit_of_work()?;
    let result = (|| {
        let counter = uow
            .entity("Person", id)?
            .ok_or_else(|| CoreError::invalid_operation(format!("counter {id} is missing")))?;
        let current = counter.get("age")?.as_integer().unwrap_or_default();
        counter.set("age", current + 1)?;
        uow.submit().map(|_| ())
    })();
    uow.close();
    result
}

/// Increments the counter from several threads, each increment in its own
/// unit of work, retrying on concurrent modification.
pub fn stress_counter(repository: &Repository, id: &EntityId, config: &StressConfig) -> StressResult {
    let committed = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                for _ in 0..config.increments {
                    let mut attempts = 0;
                    loop {
                        match increment_once(repository, id) {
                            Ok(()) => {
                                committed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(e) if e.is_concurrent_modification() && attempts < config.max_retries => {
                                conflicts.fetch_add(1, Ordering::Relaxed);
                                attempts += 1;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "increment failed");
                                failed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    StressResult {
        committed: committed.into_inner(),
        conflicts: conflicts.into_inner(),
        failed: failed.into_inner(),
        duration: start.elapsed(),
    }
}
