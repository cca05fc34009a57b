//! Host-authoritative state synchronization
//!
//! A [`SyncRuntime`] owns one peer's copy of the state tree. The host
//! applies actions and broadcasts diffs on a fixed interval; mirrors forward
//! their actions and apply whatever the host sends. Actions carry a seed so
//! every applier draws the same random numbers without sending them.

mod context;
mod definition;
mod errors;
mod observers;
mod runtime;
pub mod suggest;


pub use context::{ActionContext, SetupContext};
pub use definition::{ActionFn, Definition, SetupFn};
pub use errors::{RuntimeError, RuntimeResult};
pub use observers::Subscription;
pub use runtime::SyncRuntime;
