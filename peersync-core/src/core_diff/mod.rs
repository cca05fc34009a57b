/*
    core_diff - Structural diff and patch over state trees

    The host diffs its live state against the snapshot taken on the previous
    sync cycle and ships the resulting patch list; mirrors apply that list
    in order to converge on the host's tree.

    Responsibilities:
    - Model the state tree (null, bool, number, string, sequence, mapping)
    - Compute an ordered list of add/replace/remove edits between two trees
    - Apply edits in place, creating intermediate mappings on the way
*/

pub mod diff;
pub mod patch;
pub mod value;

pub use diff::generate_diff;
pub use patch::{apply_patch, apply_patches, Patch, PatchError, PatchOp, PatchResult, PathSegment};
pub use value::{deep_clone, Value};
