//! Entity lifecycle status.

use std::fmt;

/// Lifecycle status of an entity within its unit of work.
///
/// Within one unit of work a status only moves up the order
/// `Loaded < Modified < Created < Removed`; `Evicted` and `Detached` are
/// terminal. The engine itself resets entities to `Loaded` after a
/// successful submit or a rollback, and that is the only way down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    /// State matches the store as of the last load or submit.
    Loaded,
    /// A property was written since the last load or submit.
    Modified,
    /// Created in this unit of work and not yet submitted.
    Created,
    /// Marked for removal; excluded from lookups.
    Removed,
    /// Removal was submitted; the entity left the identity cache.
    Evicted,
    /// The owning unit of work closed or discarded the entity.
    Detached,
}

impl EntityStatus {
    const fn rank(self) -> u8 {
        match self {
            EntityStatus::Loaded => 0,
            EntityStatus::Modified => 1,
            EntityStatus::Created => 2,
            EntityStatus::Removed => 3,
            EntityStatus::Evicted => 4,
            EntityStatus::Detached => 5,
        }
    }

    /// Returns `target` if moving there raises the status, `None` otherwise.
    ///
    /// Terminal statuses never move.
    #[must_use]
    pub const fn raised_to(self, target: EntityStatus) -> Option<EntityStatus> {
        if self.is_terminal() || target.rank() <= self.rank() {
            None
        } else {
            Some(target)
        }
    }

    /// True for statuses that belong in the modified set.
    #[must_use]
    pub const fn is_modified(self) -> bool {
        matches!(
            self,
            EntityStatus::Modified | EntityStatus::Created | EntityStatus::Removed
        )
    }

    /// True for `Evicted` and `Detached`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, EntityStatus::Evicted | EntityStatus::Detached)
    }

    /// True if lookups within the unit of work should return the entity.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        matches!(
            self,
            EntityStatus::Loaded | EntityStatus::Modified | EntityStatus::Created
        )
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityStatus::Loaded => "LOADED",
            EntityStatus::Modified => "MODIFIED",
            EntityStatus::Created => "CREATED",
            EntityStatus::Removed => "REMOVED",
            EntityStatus::Evicted => "EVICTED",
            EntityStatus::Detached => "DETACHED",
        };
        f.write_str(name)
    }
}
