//! Property and entity type descriptors.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::property::{ConstraintConcern, PropertyConcern};
use entimap_codec::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Accessor for a property whose value is derived from the entity.
pub type ComputedFn = Arc<dyn Fn(&Entity) -> CoreResult<Value> + Send + Sync>;

/// Generator for a default value.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Whether a collection keeps duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Ordered, duplicates allowed.
    List,
    /// Ordered by insertion, duplicates dropped.
    Set,
}

/// What a property holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// A single raw value.
    Value,
    /// Reference to one entity, stored as its id.
    Association {
        /// Target type name (concrete or implemented).
        target: String,
    },
    /// References to several entities, stored as a list of ids.
    ManyAssociation {
        /// Target type name (concrete or implemented).
        target: String,
    },
    /// A collection of raw values.
    Collection(CollectionKind),
}

impl PropertyKind {
    /// Target type of an association kind.
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyKind::Association { target } | PropertyKind::ManyAssociation { target } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// True for kinds whose raw value is a list.
    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            PropertyKind::ManyAssociation { .. } | PropertyKind::Collection(_)
        )
    }

    fn label(&self) -> &'static str {
        match self {
            PropertyKind::Value => "value",
            PropertyKind::Association { .. } => "association",
            PropertyKind::ManyAssociation { .. } => "many-association",
            PropertyKind::Collection(_) => "collection",
        }
    }
}

/// Default substituted when a property reads as null.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Constant(Value),
    /// Computed on first read, then cached per entity.
    Computed(DefaultFn),
}

impl DefaultValue {
    pub(crate) fn produce(&self) -> Value {
        match self {
            DefaultValue::Constant(value) => value.clone(),
            DefaultValue::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            DefaultValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Static description of one property.
#[derive(Clone)]
pub struct PropertyDescriptor {
    name: String,
    kind: PropertyKind,
    nullable: bool,
    immutable: bool,
    default: Option<DefaultValue>,
    computed: Option<ComputedFn>,
    concerns: Vec<Arc<dyn PropertyConcern>>,
}

impl PropertyDescriptor {
    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            immutable: false,
            default: None,
            computed: None,
            concerns: Vec::new(),
        }
    }

    /// Single-valued property.
    pub fn value(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Value)
    }

    /// Association to one entity of `target` type.
    pub fn association(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Association {
                target: target.into(),
            },
        )
    }

    /// Association to many entities of `target` type.
    pub fn many_association(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            PropertyKind::ManyAssociation {
                target: target.into(),
            },
        )
    }

    /// List collection of raw values.
    pub fn list(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Collection(CollectionKind::List))
    }

    /// Set collection of raw values.
    pub fn set(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Collection(CollectionKind::Set))
    }

    /// Read-only property derived from the entity.
    pub fn computed<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Entity) -> CoreResult<Value> + Send + Sync + 'static,
    {
        let mut descriptor = Self::with_kind(name, PropertyKind::Value);
        descriptor.nullable = true;
        descriptor.computed = Some(Arc::new(f));
        descriptor
    }

    /// Allows null values.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Rejects writes once a value is set.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Substitutes a constant when the property reads as null.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Constant(value.into()));
        self
    }

    /// Substitutes a generated value when the property reads as null.
    #[must_use]
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Computed(Arc::new(f)));
        self
    }

    /// Appends a concern to this property's chain.
    #[must_use]
    pub fn concern(mut self, concern: impl PropertyConcern + 'static) -> Self {
        self.concerns.push(Arc::new(concern));
        self
    }

    /// Appends a shared concern to this property's chain.
    #[must_use]
    pub fn shared_concern(mut self, concern: Arc<dyn PropertyConcern>) -> Self {
        self.concerns.push(concern);
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Property kind.
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// True if null is a legal value.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// True if the property may only be written while unset.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// True for computed properties.
    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// Declared default, if any.
    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub(crate) fn computed_fn(&self) -> Option<&ComputedFn> {
        self.computed.as_ref()
    }

    pub(crate) fn ensure_kind(&self, entity_type: &str, expected: &str) -> CoreResult<()> {
        let actual = self.kind.label();
        if actual == expected {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "property {entity_type}.{} is a {actual} property, not a {expected} property",
                self.name
            )))
        }
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("immutable", &self.immutable)
            .field("default", &self.default)
            .field("computed", &self.computed.is_some())
            .field("concerns", &self.concerns.len())
            .finish()
    }
}

/// Static description of one concrete entity type.
///
/// Built once at startup; the concern chain of every property is assembled
/// at build time so that accessors never search for their delegates.
pub struct EntityDescriptor {
    name: String,
    implements: Vec<String>,
    properties: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
    chains: Vec<Vec<Arc<dyn PropertyConcern>>>,
}

impl EntityDescriptor {
    /// Starts describing a concrete entity type.
    pub fn builder(name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.into(),
            implements: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Concrete type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Abstract types this type can be queried and associated as.
    pub fn implements(&self) -> &[String] {
        &self.implements
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Looks up a property and its slot index, failing if absent.
    pub(crate) fn require(&self, name: &str) -> CoreResult<(usize, &PropertyDescriptor)> {
        self.index
            .get(name)
            .map(|&i| (i, &self.properties[i]))
            .ok_or_else(|| CoreError::no_such_property(&self.name, name))
    }

    pub(crate) fn chain(&self, index: usize) -> &[Arc<dyn PropertyConcern>] {
        &self.chains[index]
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("implements", &self.implements)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    name: String,
    implements: Vec<String>,
    properties: Vec<PropertyDescriptor>,
}

impl EntityDescriptorBuilder {
    /// Declares an abstract type this type implements.
    #[must_use]
    pub fn implements(mut self, name: impl Into<String>) -> Self {
        self.implements.push(name.into());
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Validates the declaration and assembles the concern chains.
    ///
    /// # Errors
    ///
    /// Fails on an empty name, duplicate property names, or a type that
    /// claims to implement itself.
    pub fn build(self) -> CoreResult<EntityDescriptor> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_schema("entity type name is empty"));
        }
        if self.implements.iter().any(|i| *i == self.name) {
            return Err(CoreError::invalid_schema(format!(
                "entity type {} implements itself",
                self.name
            )));
        }

        let mut index = HashMap::with_capacity(self.properties.len());
        for (i, property) in self.properties.iter().enumerate() {
            if property.name.is_empty() {
                return Err(CoreError::invalid_schema(format!(
                    "entity type {} declares a property with an empty name",
                    self.name
                )));
            }
            if index.insert(property.name.clone(), i).is_some() {
                return Err(CoreError::invalid_schema(format!(
                    "entity type {} declares property {} twice",
                    self.name, property.name
                )));
            }
        }

        let chains = self
            .properties
            .iter()
            .map(|property| {
                let mut chain: Vec<Arc<dyn PropertyConcern>> =
                    Vec::with_capacity(property.concerns.len() + 1);
                chain.push(Arc::new(ConstraintConcern));
                chain.extend(property.concerns.iter().cloned());
                chain
            })
            .collect();

        Ok(EntityDescriptor {
            name: self.name,
            implements: self.implements,
            properties: self.properties,
            index,
            chains,
        })
    }
}
