//! State tree values
//!
//! The shared state is a JSON-shaped tree. `serde_json::Value` already is the
//! recursive sum type we need (null | bool | number | string | sequence |
//! string-keyed mapping) with structural equality, so it is used directly.
//! Mappings are backed by a sorted map, which keeps diff output ordering
//! identical on every peer.

pub use serde_json::Value;

/// Structural copy of a state tree.
///
/// Owned values never share mutable storage, so this is a plain clone; it
/// exists so call sites that need a detached baseline read as such.
pub fn deep_clone(value: &Value) -> Value {
    value.clone()
}

/// Short name of a value's variant, used in error messages
pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
pub(crate) mod strategies {
    use super::Value;
    use proptest::prelude::*;
    use serde_json::json;

    /// Arbitrary state trees, a few levels deep
    pub(crate) fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-1000i64..1000).prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::btree_map("[a-e]{1,2}", inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Arbitrary trees rooted at a mapping, the shape every session state has
    pub(crate) fn arb_state() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-e]{1,2}", arb_value(), 0..6)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }
}
