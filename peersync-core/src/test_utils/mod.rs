//! Test utilities shared by unit and integration tests
//!
//! Fixtures build sessions of runtimes over a [`MemoryHub`](crate::core_transport::MemoryHub),
//! assertions compare peer states, and the async helpers wrap the
//! unbounded event streams every component hands out.

pub mod assertions;
pub mod async_helpers;
pub mod fixtures;

pub use assertions::*;
pub use async_helpers::*;
pub use fixtures::*;
