/*
  HostElection

  Decides which peer holds the authoritative state. One instance per peer,
  layered on any PeerTransport (normally a MonitoredTransport, so silent
  peers surface as PeerLeft).

  Modes:
    Host   -> host record is self from the start; announce it
    Mirror -> never hosts; adopts whoever announces, sends state, or joins first
    Auto   -> broadcast host_query, adopt the first host_announce; when the
              discovery window closes unanswered, self if alone, otherwise
              the smallest id among self and every known peer

  Inputs (TransportEvent):
    - Message(host_query)         -> answered with host_announce when we host
    - Message(host_announce{id})  -> adopt, or resolve a conflict by tiebreak
    - Message(host_migration{id}) -> surfaced as MigrationRequested, never acted on
    - PeerJoined(id)              -> unresolved: tiebreak (mirror: adopt id)
    - PeerLeft(id)                -> HostLost when id is the host

  Outputs:
    - ElectionEvent stream and a watch channel over the host record

  Notes:
  The host is sticky. Once agreed it only changes through conflict
  resolution, never because the host left; losing the host is reported and
  the decision what to do next belongs to the caller.
*/

mod error;

pub use error::{ElectionError, ElectionResult};

use crate::config::{ElectionConfig, ElectionMode};
use crate::core_transport::{EventBroadcaster, Message, PeerId, PeerTransport, TransportEvent};
use crate::metrics::{record_counter, CONFLICTS_RESOLVED, HOST_ELECTED};
use crate::shutdown::TaskGroup;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Changes of the host record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    /// First agreement on a host
    HostElected(PeerId),
    /// Conflict resolution replaced the host
    HostChanged { from: PeerId, to: PeerId },
    /// The host left the session. No re-election follows.
    HostLost(PeerId),
    /// A peer asked for a migration, which this protocol does not perform
    MigrationRequested(PeerId),
}

#[derive(Debug, Default)]
struct ElectionState {
    host: Option<PeerId>,
    peers: BTreeSet<PeerId>,
    host_lost: bool,
}

struct Shared {
    transport: Arc<dyn PeerTransport>,
    me: PeerId,
    mode: ElectionMode,
    state: Mutex<ElectionState>,
    host_tx: watch::Sender<Option<PeerId>>,
    events: EventBroadcaster<ElectionEvent>,
}

/// Per-peer host election
pub struct HostElection {
    shared: Arc<Shared>,
    tasks: TaskGroup,
}

/// Smallest id among the candidates
fn tiebreak<'a>(candidates: impl IntoIterator<Item = &'a PeerId>) -> Option<PeerId> {
    candidates.into_iter().min().cloned()
}

impl HostElection {
    /// Start electing over `transport`. Must be called inside a tokio runtime.
    pub fn start(transport: Arc<dyn PeerTransport>, config: &ElectionConfig) -> Self {
        let me = transport.player_id();
        let peers: BTreeSet<PeerId> = transport.peer_ids().into_iter().collect();
        let rx = transport.subscribe();
        let (host_tx, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            transport,
            me: me.clone(),
            mode: config.mode,
            state: Mutex::new(ElectionState { peers, ..Default::default() }),
            host_tx,
            events: EventBroadcaster::buffered(),
        });
        let tasks = TaskGroup::new(format!("election:{}", me));

        debug!(peer_id = %me, mode = %config.mode, "starting host election");
        match config.mode {
            ElectionMode::Host => {
                let mut state = shared.state();
                shared.set_host(&mut state, me.clone());
                drop(state);
                shared.announce(None);
            }
            ElectionMode::Mirror => shared.query(),
            ElectionMode::Auto => {
                shared.query();
                let timer = shared.clone();
                let window = config.discovery_timeout;
                tasks.spawn(async move {
                    tokio::time::sleep(window).await;
                    timer.discovery_expired();
                });
            }
        }

        tasks.spawn(pump(shared.clone(), rx));
        Self { shared, tasks }
    }

    pub fn mode(&self) -> ElectionMode {
        self.shared.mode
    }

    pub fn player_id(&self) -> PeerId {
        self.shared.me.clone()
    }

    /// Current host record, if agreed
    pub fn host(&self) -> Option<PeerId> {
        self.shared.state().host.clone()
    }

    /// Whether this peer is the authority
    pub fn is_host(&self) -> bool {
        self.shared.state().host.as_ref() == Some(&self.shared.me)
    }

    /// Whether the agreed host has left
    pub fn is_host_lost(&self) -> bool {
        self.shared.state().host_lost
    }

    /// Peers the election currently knows about
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.shared.state().peers.iter().cloned().collect()
    }

    /// Stream of host record changes
    pub fn events(&self) -> mpsc::UnboundedReceiver<ElectionEvent> {
        self.shared.events.subscribe()
    }

    /// Watch the host record
    pub fn watch_host(&self) -> watch::Receiver<Option<PeerId>> {
        self.shared.host_tx.subscribe()
    }

    /// Suspend until a host is agreed
    pub async fn wait_for_host(&self) -> ElectionResult<PeerId> {
        let mut rx = self.shared.host_tx.subscribe();
        let host = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ElectionError::Closed)?;
        (*host).clone().ok_or(ElectionError::Closed)
    }

    /// Stop reacting to the transport. The transport itself stays up.
    pub async fn destroy(&self) {
        self.tasks.shutdown().await;
        self.shared.events.close();
        debug!(peer_id = %self.shared.me, "host election stopped");
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ElectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn query(&self) {
        if let Err(e) = self.transport.send(Message::HostQuery, None) {
            warn!(peer_id = %self.me, error = %e, "host query not sent");
        }
    }

    fn announce(&self, target: Option<&PeerId>) {
        self.send_announce(self.me.clone(), target);
    }

    fn send_announce(&self, host_id: PeerId, target: Option<&PeerId>) {
        if let Err(e) = self.transport.send(Message::HostAnnounce { host_id }, target) {
            warn!(peer_id = %self.me, error = %e, "host announce not sent");
        }
    }

    /// Record `host`. Returns whether the record changed.
    fn set_host(&self, state: &mut ElectionState, host: PeerId) -> bool {
        let event = match state.host.replace(host.clone()) {
            Some(previous) if previous == host => return false,
            Some(previous) => {
                info!(peer_id = %self.me, from = %previous, to = %host, "host changed");
                ElectionEvent::HostChanged { from: previous, to: host.clone() }
            }
            None => {
                info!(peer_id = %self.me, host = %host, is_self = (host == self.me), "host elected");
                record_counter(HOST_ELECTED, 1);
                ElectionEvent::HostElected(host.clone())
            }
        };
        state.host_lost = false;
        self.host_tx.send_replace(Some(host));
        self.events.emit(event);
        true
    }

    fn discovery_expired(&self) {
        let mut state = self.state();
        if state.host.is_some() {
            return;
        }
        let winner = if state.peers.is_empty() {
            debug!(peer_id = %self.me, "discovery window closed with no peers");
            self.me.clone()
        } else {
            let winner = tiebreak(state.peers.iter().chain(std::iter::once(&self.me)));
            debug!(peer_id = %self.me, peers = state.peers.len(), "discovery window closed without announce");
            winner.unwrap_or_else(|| self.me.clone())
        };
        self.set_host(&mut state, winner.clone());
        drop(state);
        if winner == self.me {
            self.announce(None);
        }
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, message } => self.on_message(from, message),
            TransportEvent::PeerJoined(id) => self.on_peer_joined(id),
            TransportEvent::PeerLeft(id) => self.on_peer_left(id),
            _ => {}
        }
    }

    fn on_message(&self, from: PeerId, message: Message) {
        self.state().peers.insert(from.clone());
        match message {
            Message::HostQuery => {
                let hosting = self.state().host.as_ref() == Some(&self.me);
                if hosting {
                    self.announce(Some(&from));
                }
            }
            Message::HostAnnounce { host_id } => self.on_announce(from, host_id),
            Message::StateSync { .. } if self.mode == ElectionMode::Mirror => {
                let mut state = self.state();
                if state.host.is_none() {
                    self.set_host(&mut state, from);
                }
            }
            Message::HostMigration { new_host } => {
                info!(peer_id = %self.me, from = %from, new_host = %new_host, "host migration requested; keeping current host");
                self.events.emit(ElectionEvent::MigrationRequested(new_host));
            }
            _ => {}
        }
    }

    fn on_announce(&self, from: PeerId, announced: PeerId) {
        let mut state = self.state();
        let current = match state.host.clone() {
            None => {
                self.set_host(&mut state, announced.clone());
                drop(state);
                if announced == self.me {
                    self.announce(None);
                }
                return;
            }
            Some(current) if current == announced => return,
            Some(current) => current,
        };

        match self.mode {
            ElectionMode::Host => {
                warn!(peer_id = %self.me, from = %from, claimed = %announced, "ignoring competing host claim");
            }
            ElectionMode::Mirror => {
                let winner = tiebreak([&current, &announced]).unwrap_or(current.clone());
                record_counter(CONFLICTS_RESOLVED, 1);
                self.set_host(&mut state, winner);
            }
            ElectionMode::Auto => {
                let winner = tiebreak(
                    [&current, &announced, &self.me].into_iter().chain(state.peers.iter()),
                )
                .unwrap_or(current.clone());
                record_counter(CONFLICTS_RESOLVED, 1);
                debug!(peer_id = %self.me, current = %current, claimed = %announced, winner = %winner, "resolving host conflict");

                if self.set_host(&mut state, winner.clone()) {
                    // everyone who heard the losing claim learns the winner
                    drop(state);
                    self.send_announce(winner, None);
                } else {
                    drop(state);
                    self.send_announce(winner, Some(&from));
                }
            }
        }
    }

    fn on_peer_joined(&self, id: PeerId) {
        let mut state = self.state();
        let fresh = state.peers.insert(id.clone());
        match state.host.clone() {
            Some(host) => {
                drop(state);
                if host == self.me {
                    self.announce(Some(&id));
                }
            }
            None if !fresh => {}
            None => match self.mode {
                ElectionMode::Mirror => {
                    self.set_host(&mut state, id);
                }
                ElectionMode::Host => {}
                ElectionMode::Auto => {
                    let winner = tiebreak(state.peers.iter().chain(std::iter::once(&self.me)))
                        .unwrap_or_else(|| self.me.clone());
                    debug!(peer_id = %self.me, joined = %id, winner = %winner, "peer joined before discovery finished");
                    self.set_host(&mut state, winner.clone());
                    drop(state);
                    if winner == self.me {
                        self.announce(None);
                    }
                }
            },
        }
    }

    fn on_peer_left(&self, id: PeerId) {
        let mut state = self.state();
        state.peers.remove(&id);
        if state.host.as_ref() == Some(&id) && !state.host_lost {
            state.host_lost = true;
            warn!(peer_id = %self.me, host = %id, "host left the session");
            self.events.emit(ElectionEvent::HostLost(id));
        }
    }
}

async fn pump(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        shared.handle(event);
    }
    debug!(peer_id = %shared.me, "election transport closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_transport::{MemoryHub, MemoryTransport};
    use std::time::Duration;

    fn config(mode: ElectionMode) -> ElectionConfig {
        ElectionConfig { mode, discovery_timeout: Duration::from_secs(3) }
    }

    fn transport(hub: &MemoryHub, id: &str) -> Arc<MemoryTransport> {
        Arc::new(hub.connect(id))
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_host_is_immediate() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "h"), &config(ElectionMode::Host));

        assert!(election.is_host());
        assert_eq!(election.wait_for_host().await, Ok(PeerId::from("h")));
        let mut events = election.events();
        assert_eq!(events.recv().await, Some(ElectionEvent::HostElected("h".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirror_adopts_announced_host() {
        let hub = MemoryHub::new();
        let host = HostElection::start(transport(&hub, "z-host"), &config(ElectionMode::Host));
        let mirror = HostElection::start(transport(&hub, "a-mirror"), &config(ElectionMode::Mirror));

        assert_eq!(mirror.wait_for_host().await, Ok(PeerId::from("z-host")));
        assert!(!mirror.is_host());
        assert!(host.is_host());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirror_adopts_first_joined_peer() {
        let hub = MemoryHub::new();
        let mirror = HostElection::start(transport(&hub, "m"), &config(ElectionMode::Mirror));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mirror.host(), None);

        let _other = hub.connect("x");
        assert_eq!(mirror.wait_for_host().await, Ok(PeerId::from("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_auto_peer_elects_itself() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "solo"), &config(ElectionMode::Auto));
        assert_eq!(election.host(), None);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(election.host(), None);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(election.is_host());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_peers_pick_smallest_id() {
        let hub = MemoryHub::new();
        let transports: Vec<_> = ["carol", "alice", "bob"].iter().map(|id| transport(&hub, id)).collect();
        let elections: Vec<_> = transports
            .into_iter()
            .map(|t| HostElection::start(t, &config(ElectionMode::Auto)))
            .collect();

        tokio::time::sleep(Duration::from_millis(3100)).await;

        for election in &elections {
            assert_eq!(election.host(), Some(PeerId::from("alice")));
        }
        assert_eq!(elections.iter().filter(|e| e.is_host()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smaller_competing_claim_wins() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "m"), &config(ElectionMode::Auto));
        let mut events = election.events();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(election.is_host());

        let rival = hub.connect("a");
        let mut rival_events = rival.subscribe();
        rival.send(Message::HostAnnounce { host_id: "a".into() }, None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(election.host(), Some(PeerId::from("a")));
        assert_eq!(events.recv().await, Some(ElectionEvent::HostElected("m".into())));
        assert_eq!(
            events.recv().await,
            Some(ElectionEvent::HostChanged { from: "m".into(), to: "a".into() })
        );

        // the rival heard the welcome announce and then the relayed winner
        let mut announced = Vec::new();
        while let Ok(event) = rival_events.try_recv() {
            if let TransportEvent::Message { message: Message::HostAnnounce { host_id }, .. } = event {
                announced.push(host_id);
            }
        }
        assert_eq!(announced, vec![PeerId::from("m"), PeerId::from("a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_larger_competing_claim_is_answered() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "b"), &config(ElectionMode::Auto));
        tokio::time::sleep(Duration::from_secs(4)).await;

        let rival = hub.connect("z");
        let mut rival_events = rival.subscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        while rival_events.try_recv().is_ok() {}

        rival.send(Message::HostAnnounce { host_id: "z".into() }, None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(election.is_host());
        assert_eq!(
            rival_events.try_recv(),
            Ok(TransportEvent::Message {
                from: "b".into(),
                message: Message::HostAnnounce { host_id: "b".into() }
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_departure_is_sticky() {
        let hub = MemoryHub::new();
        let host_transport = transport(&hub, "a");
        let _host = HostElection::start(host_transport.clone(), &config(ElectionMode::Host));
        let follower = HostElection::start(transport(&hub, "b"), &config(ElectionMode::Auto));
        let mut events = follower.events();
        assert_eq!(follower.wait_for_host().await, Ok(PeerId::from("a")));

        host_transport.disconnect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(events.recv().await, Some(ElectionEvent::HostElected("a".into())));
        assert_eq!(events.recv().await, Some(ElectionEvent::HostLost("a".into())));
        assert!(events.try_recv().is_err());
        assert!(follower.is_host_lost());
        assert_eq!(follower.host(), Some(PeerId::from("a")));
        assert!(!follower.is_host());
    }

    #[tokio::test(start_paused = true)]
    async fn test_migration_request_is_not_acted_on() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "a"), &config(ElectionMode::Host));
        let mut events = election.events();
        let other = hub.connect("b");

        other.send(Message::HostMigration { new_host: "b".into() }, None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(events.recv().await, Some(ElectionEvent::HostElected("a".into())));
        assert_eq!(events.recv().await, Some(ElectionEvent::MigrationRequested("b".into())));
        assert!(election.is_host());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_discovery() {
        let hub = MemoryHub::new();
        let election = HostElection::start(transport(&hub, "a"), &config(ElectionMode::Auto));
        election.destroy().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(election.host(), None);
    }
}
