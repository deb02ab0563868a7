//! Entity identifier.

use entimap_codec::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of an entity.
///
/// Ids are strings so that store adapters can use their native key format.
/// Cloning is cheap; the text is shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Creates a new random entity id (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Creates an entity id from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(Arc::from(uuid.to_string()))
    }

    /// Returns the id as text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads an id out of a raw association value.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(Self::from)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&EntityId> for Value {
    fn from(id: &EntityId) -> Self {
        Value::Text(id.as_str().to_string())
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::from(&id)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<EntityId> = (0..100).map(|_| EntityId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn generated_ids_parse_as_uuid() {
        let id = EntityId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn caller_ids_round_trip_through_value() {
        let id = EntityId::from("person-1");
        let value = Value::from(&id);
        assert_eq!(EntityId::from_value(&value), Some(id));
        assert_eq!(EntityId::from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn display_and_debug() {
        let id = EntityId::from("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(format!("{id:?}"), "EntityId(abc)");
    }
}
