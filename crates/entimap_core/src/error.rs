//! Error types for entimap core.

use crate::entity::{EntityId, EntityReference};
use crate::types::UnitOfWorkId;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Phase of a submit in which an optimistic conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictPhase {
    /// Detected while preparing; nothing was written.
    Prepare,
    /// Detected between prepare and commit. Another unit of work committed
    /// after this one had already passed its prepare check.
    Commit,
}

impl fmt::Display for ConflictPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPhase::Prepare => f.write_str("prepare"),
            ConflictPhase::Commit => f.write_str("commit"),
        }
    }
}

/// Errors that can occur in entimap core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entimap_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by a store adapter.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// Null read from or written to a property that is not nullable.
    #[error("property {entity_type}.{property} is not nullable")]
    NotNullable {
        /// Entity type declaring the property.
        entity_type: String,
        /// Property name.
        property: String,
    },

    /// Write to an immutable property that already holds a value.
    #[error("property {entity_type}.{property} is immutable")]
    Immutable {
        /// Entity type declaring the property.
        entity_type: String,
        /// Property name.
        property: String,
    },

    /// Optimistic version mismatch.
    #[error("concurrent modification detected during {phase}: {}", describe(.entities))]
    ConcurrentModification {
        /// Submit phase that detected the conflict.
        phase: ConflictPhase,
        /// Entities whose stored version moved.
        entities: Vec<EntityReference>,
    },

    /// An entity with this id is already tracked by the unit of work.
    #[error("duplicate entity id: {id}")]
    DuplicateId {
        /// The conflicting id.
        id: EntityId,
    },

    /// The operation is not supported by this store or property.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Description of the rejected operation.
        operation: String,
    },

    /// The entity is no longer attached to an open unit of work.
    #[error("entity {id} is detached")]
    Detached {
        /// The detached entity.
        id: EntityId,
    },

    /// The unit of work has been closed.
    #[error("unit of work {id} is closed")]
    UnitOfWorkClosed {
        /// The closed unit of work.
        id: UnitOfWorkId,
    },

    /// No descriptor is registered under this type name.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Requested type name.
        name: String,
    },

    /// The entity type declares no property with this name.
    #[error("entity type {entity_type} has no property {property}")]
    NoSuchProperty {
        /// Entity type searched.
        entity_type: String,
        /// Requested property name.
        property: String,
    },

    /// Schema registration rejected a descriptor.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A pessimistic lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting for lock on {entity}")]
    LockTimeout {
        /// The contended entity.
        entity: EntityReference,
        /// Configured wait bound.
        timeout: Duration,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

fn describe(entities: &[EntityReference]) -> String {
    entities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl CoreError {
    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a not-nullable error.
    pub fn not_nullable(entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::NotNullable {
            entity_type: entity_type.into(),
            property: property.into(),
        }
    }

    /// Creates an immutable error.
    pub fn immutable(entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::Immutable {
            entity_type: entity_type.into(),
            property: property.into(),
        }
    }

    /// Creates a concurrent modification error.
    pub fn concurrent_modification(phase: ConflictPhase, entities: Vec<EntityReference>) -> Self {
        Self::ConcurrentModification { phase, entities }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates a no such property error.
    pub fn no_such_property(entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::NoSuchProperty {
            entity_type: entity_type.into(),
            property: property.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for optimistic conflicts, which callers resolve by
    /// discarding and retrying.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Entities named by a concurrent modification error.
    pub fn conflicting_entities(&self) -> &[EntityReference] {
        match self {
            Self::ConcurrentModification { entities, .. } => entities,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_lists_entities() {
        let err = CoreError::concurrent_modification(
            ConflictPhase::Prepare,
            vec![
                EntityReference::new("Person", EntityId::from("p1")),
                EntityReference::new("Person", EntityId::from("p2")),
            ],
        );

        assert!(err.is_concurrent_modification());
        assert_eq!(err.conflicting_entities().len(), 2);
        assert_eq!(
            err.to_string(),
            "concurrent modification detected during prepare: Person[p1], Person[p2]"
        );
    }

    #[test]
    fn codec_errors_convert() {
        let err: CoreError = entimap_codec::CodecError::decoding_failed("eof").into();
        assert!(matches!(err, CoreError::Codec(_)));
        assert!(!err.is_concurrent_modification());
        assert!(err.conflicting_entities().is_empty());
    }
}
