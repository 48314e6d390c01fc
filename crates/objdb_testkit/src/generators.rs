//! Property-based test generators using proptest.
//!
//! Provides strategies for ids, values and session operation sequences
//! over the sample people model.

use crate::fixtures::people;
use objdb_core::{FieldId, ObjId, Value};
use proptest::prelude::*;

/// Strategy for generating non-nil object ids.
pub fn obj_id_strategy() -> impl Strategy<Value = ObjId> {
    any::<u128>()
        .prop_filter("object id must not be nil", |v| *v != 0)
        .prop_map(ObjId::from_u128)
}

/// Strategy for short lowercase words, handy for search tests.
pub fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex")
}

/// Strategy for arbitrary text including non-ASCII characters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..24).prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for generating scalar values of every data type.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        any::<f64>()
            .prop_filter("NaN never compares equal", |v| !v.is_nan())
            .prop_map(Value::Decimal),
        text_strategy().prop_map(Value::String),
        any::<i64>().prop_map(Value::DateTime),
        any::<bool>().prop_map(Value::Boolean),
        obj_id_strategy().prop_map(Value::Id),
        any::<u32>().prop_map(Value::Enum),
    ]
}

/// An operation on a people database, addressed by slot.
///
/// Slots index into the list of people created so far; generated slots
/// are reduced modulo that length when applied.
#[derive(Debug, Clone)]
pub enum SessionOp {
    /// Create a person.
    Create,
    /// Delete a person.
    Delete(usize),
    /// Set a person's name.
    SetName(usize, String),
    /// Set a person's age.
    SetAge(usize, i64),
    /// Clear a person's name.
    ClearName(usize),
    /// Link two people as friends.
    Befriend(usize, usize),
    /// Unlink two friends.
    Unfriend(usize, usize),
    /// Commit the session.
    Commit,
    /// Roll the session back.
    Rollback,
}

/// Strategy for a single session operation.
pub fn session_op_strategy() -> impl Strategy<Value = SessionOp> {
    let slot = 0..16usize;
    prop_oneof![
        3 => Just(SessionOp::Create),
        1 => slot.clone().prop_map(SessionOp::Delete),
        3 => (slot.clone(), word_strategy()).prop_map(|(s, n)| SessionOp::SetName(s, n)),
        2 => (slot.clone(), -100i64..100).prop_map(|(s, a)| SessionOp::SetAge(s, a)),
        1 => slot.clone().prop_map(SessionOp::ClearName),
        2 => (slot.clone(), slot.clone()).prop_map(|(a, b)| SessionOp::Befriend(a, b)),
        1 => (slot.clone(), slot).prop_map(|(a, b)| SessionOp::Unfriend(a, b)),
        2 => Just(SessionOp::Commit),
        1 => Just(SessionOp::Rollback),
    ]
}

/// Strategy for a sequence of session operations.
pub fn session_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<SessionOp>> {
    prop::collection::vec(session_op_strategy(), 1..=max_len)
}

/// Strategy for one of the indexed string fields of the people model.
pub fn indexed_text_field_strategy() -> impl Strategy<Value = FieldId> {
    prop_oneof![Just(people::NAME), Just(people::TITLE)]
}
