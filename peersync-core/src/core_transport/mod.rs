/*
  core_transport - Peer message-passing boundary

  Everything above this module (runtime, election, health monitor) talks to
  peers exclusively through the `PeerTransport` trait:

    send(message, target?)      -> unicast, or broadcast when target is None
    subscribe()                 -> stream of TransportEvent
    player_id() / peer_ids()    -> who we are, who we can currently reach
    connection_state()          -> Disconnected | Connecting | Connected | Failed
    disconnect()                -> tear down, drop every subscriber

  Inbound traffic, peer joins/leaves, connection changes and errors arrive on
  one event stream; dropping the receiver is the unsubscribe.

  ┌────────────┐  ┌──────────────┐  ┌───────────────┐
  │ SyncRuntime│  │ HostElection │  │ MonitoredTx   │
  └─────┬──────┘  └──────┬───────┘  └──────┬────────┘
        └────────────────┴────────┬─────────┘
                                  │ PeerTransport
                       ┌──────────▼──────────┐
                       │  MemoryTransport /  │
                       │  any real transport │
                       └─────────────────────┘
*/

pub mod broadcaster;
pub mod error;
pub mod memory;
pub mod message;

pub use broadcaster::EventBroadcaster;
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryHub, MemoryTransport};
pub use message::{Message, StateSyncPayload, WireContext};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Identifier of a peer. Ordering is lexicographic, which the host
/// tiebreak relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        PeerId(id)
    }
}

/// Connection lifecycle of the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Everything a transport reports to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message from `from`
    Message { from: PeerId, message: Message },
    /// A peer became reachable
    PeerJoined(PeerId),
    /// A peer left (or was declared gone)
    PeerLeft(PeerId),
    /// Local connection state changed
    ConnectionState(ConnectionState),
    /// Transport-level failure, passed through verbatim
    Error(TransportError),
}

/// Message-passing boundary consumed by the runtime and protocol layers
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send to `target`, or to every peer when `target` is `None`
    fn send(&self, message: Message, target: Option<&PeerId>) -> TransportResult<()>;

    /// Subscribe to inbound events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Our own id
    fn player_id(&self) -> PeerId;

    /// Peers currently believed reachable
    fn peer_ids(&self) -> Vec<PeerId>;

    fn connection_state(&self) -> ConnectionState;

    /// Leave the session and close every subscription
    async fn disconnect(&self);
}
