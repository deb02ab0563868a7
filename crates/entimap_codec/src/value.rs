//! Raw property values.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A raw property value as held by a composite state.
///
/// Association references are stored as [`Value::Text`] holding the target
/// identity; many-associations and collections are [`Value::List`]; nested
/// composite values are [`Value::Composite`]. Floats are not supported so
/// that equality stays total and encoding stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent or explicitly cleared value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested composite value.
    Composite(Document),
}

impl Value {
    /// Creates a byte string value.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Returns a short name for the kind of this value.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Composite(_) => "composite",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get this value as a nested composite, if it is one.
    pub fn as_composite(&self) -> Option<&Document> {
        match self {
            Value::Composite(doc) => Some(doc),
            _ => None,
        }
    }

    /// Consumes the value and returns its list items.
    ///
    /// Null becomes an empty list and any other scalar a one-element list,
    /// which is how multi-valued fields are enumerated.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// Follows a dotted path into nested composites.
    ///
    /// An empty path returns the value itself. Missing segments yield `None`.
    pub fn at_path<'a, I>(&self, segments: I) -> Option<&Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = self;
        for segment in segments {
            current = current.as_composite()?.get(segment)?;
        }
        Some(current)
    }

    /// Compares two values of the same kind.
    ///
    /// Returns `None` when the kinds differ or the kind has no natural order
    /// (composites), which comparison predicates treat as "no match".
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Total order used for sorting query results.
    ///
    /// Nulls sort first; values of different kinds are grouped by kind.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::List(_) => 5,
            Value::Composite(_) => 6,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Composite(doc)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl TryFrom<Value> for String {
    type Error = CodecError;

    fn try_from(value: Value) -> CodecResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(CodecError::type_mismatch("text", other.kind_name())),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = CodecError;

    fn try_from(value: Value) -> CodecResult<Self> {
        value
            .as_integer()
            .ok_or_else(|| CodecError::type_mismatch("integer", value.kind_name()))
    }
}

impl TryFrom<Value> for bool {
    type Error = CodecError;

    fn try_from(value: Value) -> CodecResult<Self> {
        value
            .as_bool()
            .ok_or_else(|| CodecError::type_mismatch("bool", value.kind_name()))
    }
}

impl TryFrom<Value> for Document {
    type Error = CodecError;

    fn try_from(value: Value) -> CodecResult<Self> {
        match value {
            Value::Composite(doc) => Ok(doc),
            Value::Null => Ok(Document::new()),
            other => Err(CodecError::type_mismatch("composite", other.kind_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_bool(), None);
        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::from("hello").as_text(), Some("hello"));
        assert_eq!(Value::bytes(vec![1, 2, 3]).as_bytes(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn into_list_normalizes_scalars() {
        assert!(Value::Null.into_list().is_empty());
        assert_eq!(Value::Integer(1).into_list(), vec![Value::Integer(1)]);
        assert_eq!(
            Value::from(vec![1i64, 2]).into_list(),
            vec![Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn compare_same_kind_only() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Integer(2)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::Integer(1).compare(&Value::from("1")), None);
        assert_eq!(
            Value::Composite(Document::new()).compare(&Value::Composite(Document::new())),
            None
        );
    }

    #[test]
    fn sort_cmp_puts_null_first() {
        let mut values = vec![Value::from("x"), Value::Null, Value::Integer(3)];
        values.sort_by(Value::sort_cmp);
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Integer(3));
    }

    #[test]
    fn path_descends_into_composites() {
        let address = Document::new().with("city", "Oslo");
        let value = Value::Composite(Document::new().with("address", address));

        assert_eq!(
            value.at_path(["address", "city"]),
            Some(&Value::from("Oslo"))
        );
        assert_eq!(value.at_path(["address", "zip"]), None);
        assert_eq!(value.at_path(std::iter::empty::<&str>()), Some(&value));
    }

    #[test]
    fn try_from_reports_kind() {
        let err = String::try_from(Value::Integer(1)).unwrap_err();
        assert_eq!(err, CodecError::type_mismatch("text", "integer"));
        assert_eq!(i64::try_from(Value::Integer(7)).unwrap(), 7);
        assert!(Document::try_from(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::from("a"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Integer),
                "[a-z]{0,6}".prop_map(Value::Text),
                proptest::collection::vec(any::<u8>(), 0..4).prop_map(Value::Bytes),
            ]
        }

        fn value() -> impl Strategy<Value = Value> {
            scalar().prop_recursive(2, 8, 4, |inner| {
                proptest::collection::vec(inner, 0..4).prop_map(Value::List)
            })
        }

        proptest! {
            #[test]
            fn sort_cmp_is_antisymmetric(a in value(), b in value()) {
                prop_assert_eq!(a.sort_cmp(&b), b.sort_cmp(&a).reverse());
            }

            #[test]
            fn sort_cmp_agrees_with_compare(a in value(), b in value()) {
                if let Some(ord) = a.compare(&b) {
                    prop_assert_eq!(a.sort_cmp(&b), ord);
                }
            }

            #[test]
            fn null_sorts_first(a in value()) {
                prop_assert_ne!(Value::Null.sort_cmp(&a), Ordering::Greater);
            }
        }
    }
}
