//! Queries and the predicate evaluator.
//!
//! A [`Query`] runs against a unit of work: committed entities are streamed
//! from the store, pending ones are taken from the modified set, and every
//! candidate is checked with [`Expression::evaluate`] on its live values.
//! There is no planning or indexing.
//!
//! ```rust,ignore
//! use entimap_core::query::expr;
//!
//! let adults = uow
//!     .query("Person")?
//!     .filter(expr::ge("age", 18i64).and(expr::matches("name", "A*")?))
//!     .list()?;
//! ```

mod builder;
mod expression;
mod glob;

pub use builder::{Direction, Query};
pub use expression::{CompareOp, ElementPredicate, Expression, PropertyPath, Quantifier};
pub use glob::{GlobPattern, DEFAULT_MULTI_WILDCARD, DEFAULT_SINGLE_WILDCARD};

/// Expression constructors.
pub mod expr {
    use super::{CompareOp, ElementPredicate, Expression, GlobPattern, PropertyPath, Quantifier};
    use crate::entity::EntityId;
    use crate::error::CoreResult;
    use entimap_codec::Value;

    /// All operands hold.
    pub fn and(operands: impl IntoIterator<Item = Expression>) -> Expression {
        Expression::And(operands.into_iter().collect())
    }

    /// Some operand holds.
    pub fn or(operands: impl IntoIterator<Item = Expression>) -> Expression {
        Expression::Or(operands.into_iter().collect())
    }

    /// Negation.
    pub fn not(operand: Expression) -> Expression {
        !operand
    }

    /// Entity id is one of `ids`.
    pub fn id_in<I, T>(ids: I) -> Expression
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        Expression::IdIn(ids.into_iter().map(Into::into).collect())
    }

    /// `path == value`
    pub fn eq(path: &str, value: impl Into<Value>) -> Expression {
        Expression::Equals {
            path: PropertyPath::parse(path),
            value: value.into(),
        }
    }

    /// `path` equals one of `values`.
    pub fn eq_any<I, T>(path: &str, values: I) -> Expression
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Expression::EqualsAny {
            path: PropertyPath::parse(path),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn compare(path: &str, op: CompareOp, value: Value) -> Expression {
        Expression::Compare {
            path: PropertyPath::parse(path),
            op,
            value,
        }
    }

    /// `path != value`
    pub fn ne(path: &str, value: impl Into<Value>) -> Expression {
        compare(path, CompareOp::Ne, value.into())
    }

    /// `path < value`
    pub fn lt(path: &str, value: impl Into<Value>) -> Expression {
        compare(path, CompareOp::Lt, value.into())
    }

    /// `path <= value`
    pub fn le(path: &str, value: impl Into<Value>) -> Expression {
        compare(path, CompareOp::Le, value.into())
    }

    /// `path > value`
    pub fn gt(path: &str, value: impl Into<Value>) -> Expression {
        compare(path, CompareOp::Gt, value.into())
    }

    /// `path >= value`
    pub fn ge(path: &str, value: impl Into<Value>) -> Expression {
        compare(path, CompareOp::Ge, value.into())
    }

    /// `path` is null.
    pub fn is_null(path: &str) -> Expression {
        Expression::IsNull(PropertyPath::parse(path))
    }

    /// `path` is not null.
    pub fn is_not_null(path: &str) -> Expression {
        Expression::IsNotNull(PropertyPath::parse(path))
    }

    /// `path` matches a glob using `?` and `*`.
    pub fn matches(path: &str, glob: &str) -> CoreResult<Expression> {
        Ok(matches_pattern(path, GlobPattern::new(glob)?))
    }

    /// `path` matches a precompiled glob.
    pub fn matches_pattern(path: &str, pattern: GlobPattern) -> Expression {
        Expression::Matches {
            path: PropertyPath::parse(path),
            pattern,
        }
    }

    /// Association target satisfies `expression`.
    pub fn association(name: &str, expression: Expression) -> Expression {
        Expression::Association {
            name: name.to_string(),
            expression: Box::new(expression),
        }
    }

    /// Some target of a many-association satisfies `expression`.
    pub fn any(name: &str, expression: Expression) -> Expression {
        many(name, Quantifier::Any, expression)
    }

    /// Every target of a many-association satisfies `expression`.
    pub fn all(name: &str, expression: Expression) -> Expression {
        many(name, Quantifier::All, expression)
    }

    fn many(name: &str, quantifier: Quantifier, expression: Expression) -> Expression {
        Expression::ManyAssociation {
            name: name.to_string(),
            quantifier,
            expression: Box::new(expression),
        }
    }

    /// Collection holds `value`.
    pub fn contains(name: &str, value: impl Into<Value>) -> Expression {
        collection_any(name, ElementPredicate::Equals(value.into()))
    }

    /// Some collection element satisfies `predicate`.
    pub fn collection_any(name: &str, predicate: ElementPredicate) -> Expression {
        Expression::Collection {
            name: name.to_string(),
            quantifier: Quantifier::Any,
            predicate,
        }
    }

    /// Every collection element satisfies `predicate`.
    pub fn collection_all(name: &str, predicate: ElementPredicate) -> Expression {
        Expression::Collection {
            name: name.to_string(),
            quantifier: Quantifier::All,
            predicate,
        }
    }
}
