//! Boolean expression trees over entity properties.

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::query::GlobPattern;
use crate::schema::PropertyKind;
use entimap_codec::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Not;

/// Dotted property path such as `"home.city"`.
///
/// The first segment names a property of the entity. Further segments
/// either follow an association to the target entity or descend into a
/// nested composite value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    /// Splits a path on `.`; empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Current value at this path. Missing properties, unset associations
    /// and absent nested fields read as `Null`.
    pub fn resolve(&self, entity: &Entity) -> CoreResult<Value> {
        resolve_segments(entity, &self.segments)
    }
}

impl From<&str> for PropertyPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

fn resolve_segments(entity: &Entity, segments: &[String]) -> CoreResult<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(Value::Null);
    };
    let Some(property) = entity.descriptor().property(first) else {
        return Ok(Value::Null);
    };

    if !rest.is_empty() && matches!(property.kind(), PropertyKind::Association { .. }) {
        return match entity.association(first)?.get()? {
            Some(target) => resolve_segments(&target, rest),
            None => Ok(Value::Null),
        };
    }

    let value = match entity.get(first) {
        Ok(value) => value,
        Err(CoreError::NotNullable { .. }) => Value::Null,
        Err(e) => return Err(e),
    };
    Ok(value
        .at_path(rest.iter().map(String::as_str))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Ordering comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn test(self, actual: &Value, expected: &Value) -> bool {
        if self == CompareOp::Ne {
            return actual != expected;
        }
        let Some(ordering) = actual.compare(expected) else {
            return false;
        };
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge | CompareOp::Ne => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// How a predicate over many elements is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// At least one element matches.
    Any,
    /// Every element matches; true for an empty collection.
    All,
}

impl Quantifier {
    fn apply<T>(
        self,
        items: impl IntoIterator<Item = T>,
        mut test: impl FnMut(T) -> CoreResult<bool>,
    ) -> CoreResult<bool> {
        for item in items {
            let hit = test(item)?;
            match self {
                Quantifier::Any if hit => return Ok(true),
                Quantifier::All if !hit => return Ok(false),
                _ => {}
            }
        }
        Ok(self == Quantifier::All)
    }
}

/// Predicate over one element of a primitive collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementPredicate {
    /// Element equals the value.
    Equals(Value),
    /// Element equals one of the values.
    EqualsAny(Vec<Value>),
    /// Element is text matching the glob.
    Matches(GlobPattern),
}

impl ElementPredicate {
    fn test(&self, element: &Value) -> bool {
        match self {
            ElementPredicate::Equals(expected) => element == expected,
            ElementPredicate::EqualsAny(values) => values.contains(element),
            ElementPredicate::Matches(pattern) => {
                element.as_text().is_some_and(|text| pattern.is_match(text))
            }
        }
    }
}

/// Boolean expression evaluated against live entity state.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Every operand holds; true when empty.
    And(Vec<Expression>),
    /// Some operand holds; false when empty.
    Or(Vec<Expression>),
    /// Negation.
    Not(Box<Expression>),
    /// Entity id is in the set.
    IdIn(BTreeSet<EntityId>),
    /// Property equals a value.
    Equals {
        /// Property path.
        path: PropertyPath,
        /// Expected value.
        value: Value,
    },
    /// Property equals one of the values.
    EqualsAny {
        /// Property path.
        path: PropertyPath,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Property compares to a value. Values of different kinds never
    /// satisfy an ordering comparison.
    Compare {
        /// Property path.
        path: PropertyPath,
        /// Operator.
        op: CompareOp,
        /// Right-hand side.
        value: Value,
    },
    /// Property is null.
    IsNull(PropertyPath),
    /// Property is not null.
    IsNotNull(PropertyPath),
    /// Property is text matching a glob.
    Matches {
        /// Property path.
        path: PropertyPath,
        /// Glob to match.
        pattern: GlobPattern,
    },
    /// Association target satisfies the expression. False when unset.
    Association {
        /// Association property.
        name: String,
        /// Condition on the target.
        expression: Box<Expression>,
    },
    /// Quantified condition over the targets of a many-association.
    ManyAssociation {
        /// Many-association property.
        name: String,
        /// Any or all.
        quantifier: Quantifier,
        /// Condition on each target.
        expression: Box<Expression>,
    },
    /// Quantified condition over the elements of a collection.
    Collection {
        /// Collection property.
        name: String,
        /// Any or all.
        quantifier: Quantifier,
        /// Condition on each element.
        predicate: ElementPredicate,
    },
}

impl Expression {
    /// Conjunction with another expression, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Expression) -> Expression {
        match (self, other) {
            (Expression::And(mut left), Expression::And(right)) => {
                left.extend(right);
                Expression::And(left)
            }
            (Expression::And(mut left), right) => {
                left.push(right);
                Expression::And(left)
            }
            (left, right) => Expression::And(vec![left, right]),
        }
    }

    /// Disjunction with another expression, flattening nested `Or`s.
    #[must_use]
    pub fn or(self, other: Expression) -> Expression {
        match (self, other) {
            (Expression::Or(mut left), Expression::Or(right)) => {
                left.extend(right);
                Expression::Or(left)
            }
            (Expression::Or(mut left), right) => {
                left.push(right);
                Expression::Or(left)
            }
            (left, right) => Expression::Or(vec![left, right]),
        }
    }

    /// Evaluates against the entity's current in-memory values.
    ///
    /// Association predicates load their targets through the owning unit
    /// of work. Properties the entity's type does not declare read as
    /// null, so a query over an abstract type can name properties of only
    /// some implementors.
    pub fn evaluate(&self, entity: &Entity) -> CoreResult<bool> {
        match self {
            Expression::And(operands) => {
                for operand in operands {
                    if !operand.evaluate(entity)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expression::Or(operands) => {
                for operand in operands {
                    if operand.evaluate(entity)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::Not(inner) => Ok(!inner.evaluate(entity)?),
            Expression::IdIn(ids) => Ok(ids.contains(entity.id())),
            Expression::Equals { path, value } => Ok(path.resolve(entity)? == *value),
            Expression::EqualsAny { path, values } => {
                let actual = path.resolve(entity)?;
                Ok(values.contains(&actual))
            }
            Expression::Compare { path, op, value } => {
                let actual = path.resolve(entity)?;
                Ok(op.test(&actual, value))
            }
            Expression::IsNull(path) => Ok(path.resolve(entity)?.is_null()),
            Expression::IsNotNull(path) => Ok(!path.resolve(entity)?.is_null()),
            Expression::Matches { path, pattern } => Ok(path
                .resolve(entity)?
                .as_text()
                .is_some_and(|text| pattern.is_match(text))),
            Expression::Association { name, expression } => {
                if !declares(entity, name) {
                    return Ok(false);
                }
                match entity.association(name)?.get()? {
                    Some(target) => expression.evaluate(&target),
                    None => Ok(false),
                }
            }
            Expression::ManyAssociation {
                name,
                quantifier,
                expression,
            } => {
                if !declares(entity, name) {
                    return Ok(false);
                }
                let targets = entity.many_association(name)?.to_vec()?;
                quantifier.apply(targets, |target| expression.evaluate(&target))
            }
            Expression::Collection {
                name,
                quantifier,
                predicate,
            } => {
                if !declares(entity, name) {
                    return Ok(false);
                }
                let elements = entity.collection(name)?.get()?;
                quantifier.apply(elements, |element| Ok(predicate.test(&element)))
            }
        }
    }
}

fn declares(entity: &Entity, property: &str) -> bool {
    entity.descriptor().property(property).is_some()
}

impl Not for Expression {
    type Output = Expression;

    fn not(self) -> Expression {
        match self {
            Expression::Not(inner) => *inner,
            other => Expression::Not(Box::new(other)),
        }
    }
}
