//! Assertions over peer states
//!
//! Failures print the diff between the diverging trees, which is far more
//! readable than two full JSON dumps.

use crate::core_diff::{generate_diff, Value};
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Assert that every state equals the first one
pub fn assert_converged(states: &[Value]) {
    let Some(first) = states.first() else {
        return;
    };
    for (index, state) in states.iter().enumerate().skip(1) {
        if state != first {
            panic!(
                "State of peer #{} diverges from peer #0. Patches from #0 to #{}: {}",
                index,
                index,
                serde_json::to_string(&generate_diff(first, state)).unwrap_or_default()
            );
        }
    }
}

/// Assert that `state` holds `expected` at the JSON pointer `pointer`
pub fn assert_at(state: &Value, pointer: &str, expected: &Value) {
    match state.pointer(pointer) {
        Some(actual) if actual == expected => {}
        Some(actual) => panic!("Expected {} at {}, found {}", expected, pointer, actual),
        None => panic!("Nothing at {} in {}", pointer, state),
    }
}
