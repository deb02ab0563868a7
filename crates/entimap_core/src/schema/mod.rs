//! Entity type descriptors.
//!
//! Types are described once at startup with an explicit table of
//! properties (name, kind, nullability, immutability, default, concerns)
//! and frozen into a [`SchemaRegistry`].

mod descriptor;
mod registry;

pub use descriptor::{
    CollectionKind, ComputedFn, DefaultFn, DefaultValue, EntityDescriptor,
    EntityDescriptorBuilder, PropertyDescriptor, PropertyKind,
};
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};
