/*
    patch.rs - Patch operations and in-place application

    A patch is one structural edit at a path inside the state tree:
      { op: add | replace | remove, path: [key, ...], value? }

    Path segments are mapping keys or sequence indices. On the wire they
    serialize as plain strings / numbers, and either form is accepted
    against either container (a numeric string indexes a sequence, an index
    keys a mapping by its decimal form).
*/

use super::value::{kind_name, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for patch application
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors raised while applying a patch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// Patches must address something below the root
    #[error("Patch path must contain at least one segment")]
    EmptyPath,

    /// `add`/`replace` without a value
    #[error("Patch {op} at {path} is missing a value")]
    MissingValue { op: PatchOp, path: String },

    /// A segment could not be resolved against the container it addresses
    #[error("Cannot resolve segment {segment} at {path}: {reason}")]
    InvalidSegment { segment: String, path: String, reason: String },

    /// Traversal hit a scalar where a container was required
    #[error("Cannot descend into {kind} at {path}")]
    NotAContainer { kind: &'static str, path: String },
}

/// Kind of edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// One step of a patch path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl PathSegment {
    fn as_key(&self) -> String {
        match self {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.clone(),
        }
    }

    fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) => k.parse().ok(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => write!(f, "{:?}", k),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// A single structural edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn add(path: Vec<PathSegment>, value: Value) -> Self {
        Patch { op: PatchOp::Add, path, value: Some(value) }
    }

    pub fn replace(path: Vec<PathSegment>, value: Value) -> Self {
        Patch { op: PatchOp::Replace, path, value: Some(value) }
    }

    pub fn remove(path: Vec<PathSegment>) -> Self {
        Patch { op: PatchOp::Remove, path, value: None }
    }

    /// Whether this patch replaces the whole tree.
    ///
    /// Only `generate_diff` on two roots of different shape produces one;
    /// it cannot be applied with `apply_patch` and is shipped as a full
    /// state transfer instead.
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

fn render_path(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path.iter().map(|s| s.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Apply one patch to `state` in place.
///
/// Missing intermediate keys are created as empty mappings. Fails when the
/// path is empty, when an intermediate node is a scalar, or when a sequence
/// index is out of range.
pub fn apply_patch(state: &mut Value, patch: &Patch) -> PatchResult<()> {
    let (last, parents) = patch.path.split_last().ok_or(PatchError::EmptyPath)?;

    let mut current = state;
    for (depth, segment) in parents.iter().enumerate() {
        current = descend(current, segment, &patch.path[..depth])?;
    }

    let here = || render_path(&patch.path[..patch.path.len() - 1]);
    match patch.op {
        PatchOp::Add | PatchOp::Replace => {
            let value = patch.value.clone().ok_or_else(|| PatchError::MissingValue {
                op: patch.op,
                path: render_path(&patch.path),
            })?;
            assign(current, last, value, &here)
        }
        PatchOp::Remove => match current {
            Value::Object(map) => {
                map.remove(&last.as_key());
                Ok(())
            }
            Value::Array(items) => {
                let index = sequence_index(items.len(), last, &here, false)?;
                items.remove(index);
                Ok(())
            }
            other => Err(PatchError::NotAContainer { kind: kind_name(other), path: here() }),
        },
    }
}

/// Apply patches in order, stopping at the first failure
pub fn apply_patches(state: &mut Value, patches: &[Patch]) -> PatchResult<()> {
    for patch in patches {
        apply_patch(state, patch)?;
    }
    Ok(())
}

fn descend<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    walked: &[PathSegment],
) -> PatchResult<&'a mut Value> {
    match current {
        Value::Object(map) => Ok(map
            .entry(segment.as_key())
            .or_insert_with(|| Value::Object(Default::default()))),
        Value::Array(items) => {
            let len = items.len();
            let index = sequence_index(len, segment, &|| render_path(walked), false)?;
            Ok(&mut items[index])
        }
        other => Err(PatchError::NotAContainer { kind: kind_name(other), path: render_path(walked) }),
    }
}

fn assign(
    current: &mut Value,
    segment: &PathSegment,
    value: Value,
    here: &dyn Fn() -> String,
) -> PatchResult<()> {
    match current {
        Value::Object(map) => {
            map.insert(segment.as_key(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = sequence_index(items.len(), segment, here, true)?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        other => Err(PatchError::NotAContainer { kind: kind_name(other), path: here() }),
    }
}

/// Resolve a segment against a sequence of `len` items. `allow_end` permits
/// `len` itself, which appends.
fn sequence_index(
    len: usize,
    segment: &PathSegment,
    here: &dyn Fn() -> String,
    allow_end: bool,
) -> PatchResult<usize> {
    let index = segment.as_index().ok_or_else(|| PatchError::InvalidSegment {
        segment: segment.to_string(),
        path: here(),
        reason: "sequence segments must be indices".to_string(),
    })?;
    let in_range = if allow_end { index <= len } else { index < len };
    if !in_range {
        return Err(PatchError::InvalidSegment {
            segment: segment.to_string(),
            path: here(),
            reason: format!("index out of range for sequence of length {}", len),
        });
    }
    Ok(index)
}
