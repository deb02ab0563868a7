//! # entimap core
//!
//! Unit-of-work entity mapping engine.
//!
//! This crate provides:
//! - Schema descriptors for concrete and abstract entity types
//! - Entities whose property reads and writes run through concern chains
//! - Units of work with an identity cache and a modified set
//! - Two-phase submit, discard, reload and refresh
//! - Nested units of work layered over a parent
//! - A predicate evaluator for queries over committed and pending entities
//! - Optimistic and pessimistic locking decorators over a store SPI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entimap_core::{EntityDescriptor, PropertyDescriptor, Repository, SchemaRegistry};
//!
//! let registry = SchemaRegistry::builder()
//!     .entity(
//!         EntityDescriptor::builder("Person")
//!             .property(PropertyDescriptor::value("name"))
//!             .build()?,
//!     )
//!     .build()?;
//! let repository = Repository::builder(registry).build()?;
//!
//! let uow = repository.new_unit_of_work()?;
//! let ann = uow.create_entity("Person", None)?;
//! ann.set("name", "Ann")?;
//! uow.submit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod entity;
pub mod error;
pub mod locking;
pub mod property;
pub mod query;
pub mod repository;
pub mod schema;
pub mod spi;
pub mod state;
pub mod stats;
pub mod store;
pub mod typed;
pub mod types;
pub mod uow;

#[cfg(test)]
mod test_support;

pub use config::{LockingMode, RepositoryConfig};
pub use entity::{Entity, EntityId, EntityReference, EntityStatus};
pub use error::{ConflictPhase, CoreError, CoreResult};
pub use locking::{LockPolicy, LockTable, VersionTable};
pub use property::{Association, CollectionProperty, ManyAssociation, Property, PropertyConcern};
pub use query::{Direction, Expression, Query};
pub use repository::{Repository, RepositoryBuilder};
pub use schema::{EntityDescriptor, PropertyDescriptor, SchemaRegistry};
pub use spi::{EntityStore, StoreUnitOfWork, SubmitResult};
pub use stats::{RepositoryStats, StatsSnapshot};
pub use store::MemoryStore;
pub use typed::EntityType;
pub use types::UnitOfWorkId;
pub use uow::{LifecycleEvent, LifecycleHook, UnitOfWork};

// Re-export the value model for convenience.
pub use entimap_codec::{Document, Value};
