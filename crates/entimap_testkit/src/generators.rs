//! Property-based test generators using proptest.
//!
//! Provides strategies for names, values and sequences of unit-of-work
//! operations.

use entimap_codec::Value;
use entimap_core::EntityId;
use proptest::prelude::*;

/// Strategy for generating entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}")
        .expect("Invalid regex")
        .prop_map(EntityId::from)
}

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,7}").expect("Invalid regex")
}

/// Strategy for generating scalar property values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

/// Strategy for generating glob patterns over `[a-c]` with both wildcards.
pub fn glob_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[abc?*]{0,6}").expect("Invalid regex")
}

/// One step applied to a pool of people in a unit of work.
#[derive(Debug, Clone)]
pub enum UnitOfWorkOp {
    /// Create a person with this name.
    Create(String),
    /// Rename the person at this pool index (modulo pool size).
    Rename(usize, String),
    /// Remove the person at this pool index (modulo pool size).
    Remove(usize),
    /// Submit pending changes.
    Submit,
    /// Discard pending changes.
    Discard,
}

/// Strategy for generating a single unit-of-work step.
pub fn unit_of_work_op_strategy() -> impl Strategy<Value = UnitOfWorkOp> {
    prop_oneof![
        3 => name_strategy().prop_map(UnitOfWorkOp::Create),
        3 => (any::<usize>(), name_strategy()).prop_map(|(i, n)| UnitOfWorkOp::Rename(i, n)),
        1 => any::<usize>().prop_map(UnitOfWorkOp::Remove),
        2 => Just(UnitOfWorkOp::Submit),
        1 => Just(UnitOfWorkOp::Discard),
    ]
}

/// Strategy for generating a sequence of unit-of-work steps.
pub fn unit_of_work_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<UnitOfWorkOp>> {
    prop::collection::vec(unit_of_work_op_strategy(), 1..=max_len)
}
