//! Peer liveness monitoring
//!
//! Native leave notifications are not trustworthy: a crashed process or a
//! dropped connection may never produce one. [`MonitoredTransport`] wraps any
//! [`PeerTransport`] and keeps its own record of who is alive:
//!
//! - every `ping_interval` it broadcasts `health_ping` and sweeps its records
//! - a `health_ping` is answered with a `health_pong` echoing the timestamp
//! - *any* inbound message refreshes the sender's `last_seen`
//! - a peer silent for longer than `peer_timeout` is evicted and a synthetic
//!   `PeerLeft` is emitted, exactly once
//!
//! Ping and pong traffic is consumed here; subscribers only ever see the
//! remaining messages plus deduplicated join and leave events. Everything
//! layered on top (election, runtime) therefore learns about a silent peer
//! through the same `PeerLeft` it would get from a clean disconnect.

use crate::config::HealthConfig;
use crate::core_transport::{
    ConnectionState, EventBroadcaster, Message, PeerId, PeerTransport, TransportEvent,
    TransportResult,
};
use crate::metrics::{record_counter, record_gauge, PEERS_EVICTED, PEERS_KNOWN};
use crate::shutdown::TaskGroup;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// What the monitor knows about one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub last_seen: Instant,
}

struct Shared {
    inner: Arc<dyn PeerTransport>,
    me: PeerId,
    config: HealthConfig,
    peers: Mutex<BTreeMap<PeerId, Instant>>,
    events: EventBroadcaster<TransportEvent>,
}

/// Transport decorator that detects silent peers
pub struct MonitoredTransport {
    shared: Arc<Shared>,
    tasks: TaskGroup,
}

impl MonitoredTransport {
    /// Wrap `inner` and start pinging. Must be called inside a tokio runtime.
    pub fn new(inner: Arc<dyn PeerTransport>, config: HealthConfig) -> Self {
        let me = inner.player_id();
        let now = Instant::now();
        let peers = inner.peer_ids().into_iter().map(|id| (id, now)).collect::<BTreeMap<_, _>>();
        record_gauge(PEERS_KNOWN, peers.len() as f64);

        let rx = inner.subscribe();
        let shared = Arc::new(Shared {
            inner,
            me: me.clone(),
            config,
            peers: Mutex::new(peers),
            events: EventBroadcaster::buffered(),
        });

        let tasks = TaskGroup::new(format!("health:{}", me));
        tasks.spawn(pump(shared.clone(), rx));

        let ticker = shared.clone();
        tasks.spawn_periodic(shared.config.ping_interval, move || {
            let shared = ticker.clone();
            async move {
                shared.ping();
                shared.sweep(Instant::now());
            }
        });

        debug!(
            peer_id = %me,
            ping_interval = ?shared.config.ping_interval,
            peer_timeout = ?shared.config.peer_timeout,
            "health monitor started"
        );
        Self { shared, tasks }
    }

    /// Convenience constructor taking ownership of a concrete transport
    pub fn wrap<T: PeerTransport + 'static>(inner: T, config: HealthConfig) -> Self {
        Self::new(Arc::new(inner), config)
    }

    /// Snapshot of every peer currently considered alive
    pub fn known_peers(&self) -> Vec<PeerRecord> {
        self.shared
            .peers()
            .iter()
            .map(|(id, last_seen)| PeerRecord { id: id.clone(), last_seen: *last_seen })
            .collect()
    }
}

impl Shared {
    fn peers(&self) -> MutexGuard<'_, BTreeMap<PeerId, Instant>> {
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Refresh `last_seen`. Returns true when the peer was not known before.
    fn touch(&self, id: &PeerId) -> bool {
        let mut peers = self.peers();
        let fresh = peers.insert(id.clone(), Instant::now()).is_none();
        if fresh {
            record_gauge(PEERS_KNOWN, peers.len() as f64);
        }
        fresh
    }

    fn forget(&self, id: &PeerId) -> bool {
        let mut peers = self.peers();
        let known = peers.remove(id).is_some();
        if known {
            record_gauge(PEERS_KNOWN, peers.len() as f64);
        }
        known
    }

    fn ping(&self) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if let Err(e) = self.inner.send(Message::HealthPing { timestamp }, None) {
            debug!(peer_id = %self.me, error = %e, "health ping not sent");
        }
    }

    /// Evict every peer silent for longer than the timeout
    fn sweep(&self, now: Instant) {
        let evicted: Vec<PeerId> = {
            let mut peers = self.peers();
            let stale: Vec<PeerId> = peers
                .iter()
                .filter(|(_, seen)| now.saturating_duration_since(**seen) > self.config.peer_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                peers.remove(id);
            }
            if !stale.is_empty() {
                record_gauge(PEERS_KNOWN, peers.len() as f64);
            }
            stale
        };

        for id in evicted {
            warn!(peer_id = %self.me, peer = %id, timeout = ?self.config.peer_timeout, "evicting silent peer");
            record_counter(PEERS_EVICTED, 1);
            self.events.emit(TransportEvent::PeerLeft(id));
        }
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, message } => {
                if self.touch(&from) {
                    info!(peer_id = %self.me, peer = %from, "first contact from unknown peer");
                    self.events.emit(TransportEvent::PeerJoined(from.clone()));
                }
                match message {
                    Message::HealthPing { timestamp } => {
                        trace!(peer_id = %self.me, peer = %from, timestamp, "answering health ping");
                        if let Err(e) = self.inner.send(Message::HealthPong { timestamp }, Some(&from)) {
                            debug!(peer_id = %self.me, peer = %from, error = %e, "health pong not sent");
                        }
                    }
                    Message::HealthPong { timestamp } => {
                        trace!(peer_id = %self.me, peer = %from, timestamp, "health pong");
                    }
                    message => {
                        self.events.emit(TransportEvent::Message { from, message });
                    }
                }
            }
            TransportEvent::PeerJoined(id) => {
                if self.touch(&id) {
                    self.events.emit(TransportEvent::PeerJoined(id));
                }
            }
            TransportEvent::PeerLeft(id) => {
                if self.forget(&id) {
                    self.events.emit(TransportEvent::PeerLeft(id));
                } else {
                    trace!(peer_id = %self.me, peer = %id, "leave for unknown peer dropped");
                }
            }
            other => {
                self.events.emit(other);
            }
        }
    }
}

async fn pump(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        shared.handle(event);
    }
    debug!(peer_id = %shared.me, "inner transport closed");
    shared.events.close();
}

#[async_trait]
impl PeerTransport for MonitoredTransport {
    fn send(&self, message: Message, target: Option<&PeerId>) -> TransportResult<()> {
        self.shared.inner.send(message, target)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    fn player_id(&self) -> PeerId {
        self.shared.me.clone()
    }

    /// Peers the monitor currently believes alive
    fn peer_ids(&self) -> Vec<PeerId> {
        self.shared.peers().keys().cloned().collect()
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.inner.connection_state()
    }

    async fn disconnect(&self) {
        self.tasks.shutdown().await;
        self.shared.inner.disconnect().await;
        self.shared.peers().clear();
        self.shared.events.emit(TransportEvent::ConnectionState(ConnectionState::Disconnected));
        self.shared.events.close();
        debug!(peer_id = %self.shared.me, "health monitor stopped");
    }
}
