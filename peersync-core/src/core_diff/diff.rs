//! Diff generation between two state trees.

use super::patch::{Patch, PathSegment};
use super::value::Value;

/// Compute the ordered edit list that turns `old` into `new`.
///
/// Rules:
/// - values of different kinds (including null against non-null) are
///   replaced wholesale at the current path
/// - sequences of different length are replaced wholesale; equal-length
///   sequences are compared index by index
/// - mappings emit `remove` for dropped keys, `add` for new keys and recurse
///   into shared keys
/// - scalars emit `replace` only when they differ
///
/// Mapping keys are visited in sorted order, so two peers diffing the same
/// pair always produce the same list.
pub fn generate_diff(old: &Value, new: &Value) -> Vec<Patch> {
    let mut patches = Vec::new();
    let mut path = Vec::new();
    diff_at(old, new, &mut path, &mut patches);
    patches
}

fn diff_at(old: &Value, new: &Value, path: &mut Vec<PathSegment>, out: &mut Vec<Patch>) {
    match (old, new) {
        (Value::Array(before), Value::Array(after)) => {
            if before.len() != after.len() {
                out.push(Patch::replace(path.clone(), new.clone()));
                return;
            }
            for (index, (a, b)) in before.iter().zip(after).enumerate() {
                path.push(PathSegment::Index(index));
                diff_at(a, b, path, out);
                path.pop();
            }
        }
        (Value::Object(before), Value::Object(after)) => {
            for key in before.keys() {
                if !after.contains_key(key) {
                    let mut removed = path.clone();
                    removed.push(PathSegment::Key(key.clone()));
                    out.push(Patch::remove(removed));
                }
            }
            for (key, b) in after {
                path.push(PathSegment::Key(key.clone()));
                match before.get(key) {
                    Some(a) => diff_at(a, b, path, out),
                    None => out.push(Patch::add(path.clone(), b.clone())),
                }
                path.pop();
            }
        }
        // Scalars, and any pair of different kinds
        _ => {
            if old != new {
                out.push(Patch::replace(path.clone(), new.clone()));
            }
        }
    }
}
