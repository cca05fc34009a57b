//! peersync-core: host-authoritative state synchronization between peers
//!
//! One peer (the host) owns the authoritative state tree; every other peer
//! holds a mirror kept current by diffs the host broadcasts on a fixed
//! interval. Randomness inside actions is reproduced from a shared seed
//! instead of being transmitted.
//!
//! Layers, bottom up:
//! - [`core_diff`], [`core_random`]: pure building blocks
//! - [`core_transport`]: the message-passing boundary and an in-memory hub
//! - [`health`]: liveness pings layered over any transport
//! - [`core_election`]: who is host
//! - [`core_runtime`]: the synchronized state itself

pub mod config;
pub mod core_diff;
pub mod core_election;
pub mod core_random;
pub mod core_runtime;
pub mod core_transport;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, ElectionMode};
pub use core_diff::{apply_patch, deep_clone, generate_diff, Patch, PatchOp, Value};
pub use core_election::{ElectionEvent, HostElection};
pub use core_random::DeterministicRandom;
pub use core_runtime::{ActionContext, Definition, RuntimeError, SyncRuntime};
pub use core_transport::{MemoryHub, Message, PeerId, PeerTransport, TransportEvent};
pub use health::MonitoredTransport;
pub use logging::{init_logging, LogLevel};
