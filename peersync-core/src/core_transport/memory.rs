/*
  MemoryHub - in-process transport

  Connects any number of `MemoryTransport`s inside one process. Used by the
  test suites and by the CLI simulator.

  - connect(id)     -> new endpoint; existing members see PeerJoined(id),
                       the newcomer sees PeerJoined for each of them
  - disconnect()    -> members see PeerLeft(id), endpoint subscribers close
  - sever(id)       -> endpoint silently stops sending and receiving; nobody
                       is told, which is what a crashed tab looks like
  - inject_error()  -> push a TransportError to one endpoint's subscribers

  Every message is encoded to bytes and decoded again on the way through, so
  the wire format is exercised exactly as a real network would.
  Per-sender ordering is FIFO.
*/

use super::broadcaster::EventBroadcaster;
use super::error::{TransportError, TransportResult};
use super::message::Message;
use super::{ConnectionState, PeerId, PeerTransport, TransportEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct Endpoint {
    events: EventBroadcaster<TransportEvent>,
    severed: bool,
}

#[derive(Default)]
struct HubInner {
    endpoints: BTreeMap<PeerId, Endpoint>,
}

/// Shared in-process switchboard
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint. Reusing a live id replaces the old endpoint.
    pub fn connect(&self, id: impl Into<PeerId>) -> MemoryTransport {
        let id = id.into();
        let events = EventBroadcaster::buffered();
        let mut hub = lock(&self.inner);

        for (other, endpoint) in hub.endpoints.iter() {
            if *other != id && !endpoint.severed {
                endpoint.events.emit(TransportEvent::PeerJoined(id.clone()));
                events.emit(TransportEvent::PeerJoined(other.clone()));
            }
        }
        if let Some(previous) = hub.endpoints.insert(
            id.clone(),
            Endpoint { events: events.clone(), severed: false },
        ) {
            previous.events.close();
        }
        debug!(peer_id = %id, members = hub.endpoints.len(), "endpoint connected to hub");

        MemoryTransport { id, hub: self.inner.clone(), events }
    }

    /// Silently cut an endpoint off. Its peers receive no leave event.
    pub fn sever(&self, id: &PeerId) {
        if let Some(endpoint) = lock(&self.inner).endpoints.get_mut(id) {
            endpoint.severed = true;
            debug!(peer_id = %id, "endpoint severed");
        }
    }

    /// Deliver a transport error to one endpoint
    pub fn inject_error(&self, id: &PeerId, error: TransportError) {
        if let Some(endpoint) = lock(&self.inner).endpoints.get(id) {
            endpoint.events.emit(TransportEvent::Error(error));
        }
    }

    /// Ids of every attached endpoint, severed ones included
    pub fn members(&self) -> Vec<PeerId> {
        lock(&self.inner).endpoints.keys().cloned().collect()
    }
}

/// One endpoint of a [`MemoryHub`]
pub struct MemoryTransport {
    id: PeerId,
    hub: Arc<Mutex<HubInner>>,
    events: EventBroadcaster<TransportEvent>,
}

impl MemoryTransport {
    fn deliver(endpoint: &Endpoint, from: &PeerId, message: Message) {
        endpoint.events.emit(TransportEvent::Message { from: from.clone(), message });
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn send(&self, message: Message, target: Option<&PeerId>) -> TransportResult<()> {
        let hub = lock(&self.hub);
        let me = match hub.endpoints.get(&self.id) {
            Some(endpoint) if !self.events.is_closed() => endpoint,
            _ => return Err(TransportError::NotConnected),
        };
        if me.severed {
            trace!(peer_id = %self.id, kind = message.kind(), "dropping send from severed endpoint");
            return Ok(());
        }

        let wire = Message::decode(&message.encode()?)?;
        match target {
            Some(target) => {
                let endpoint = hub
                    .endpoints
                    .get(target)
                    .ok_or_else(|| TransportError::PeerNotFound(target.clone()))?;
                if !endpoint.severed {
                    Self::deliver(endpoint, &self.id, wire);
                }
            }
            None => {
                for (id, endpoint) in hub.endpoints.iter() {
                    if *id != self.id && !endpoint.severed {
                        Self::deliver(endpoint, &self.id, wire.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.events.subscribe()
    }

    fn player_id(&self) -> PeerId {
        self.id.clone()
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        if self.events.is_closed() {
            return Vec::new();
        }
        lock(&self.hub).endpoints.keys().filter(|id| **id != self.id).cloned().collect()
    }

    fn connection_state(&self) -> ConnectionState {
        if self.events.is_closed() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    async fn disconnect(&self) {
        if self.events.is_closed() {
            return;
        }
        {
            let mut hub = lock(&self.hub);
            let ours = hub
                .endpoints
                .get(&self.id)
                .map(|endpoint| endpoint.events.same_channel(&self.events))
                .unwrap_or(false);
            if ours {
                hub.endpoints.remove(&self.id);
                for endpoint in hub.endpoints.values() {
                    if !endpoint.severed {
                        endpoint.events.emit(TransportEvent::PeerLeft(self.id.clone()));
                    }
                }
            }
        }
        self.events.emit(TransportEvent::ConnectionState(ConnectionState::Disconnected));
        self.events.close();
        debug!(peer_id = %self.id, "endpoint disconnected from hub");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_join_is_announced_both_ways() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let mut a_events = a.subscribe();
        let b = hub.connect("b");

        let mut b_events = b.subscribe();

        assert_eq!(a_events.recv().await, Some(TransportEvent::PeerJoined("b".into())));
        assert_eq!(b_events.recv().await, Some(TransportEvent::PeerJoined("a".into())));
        assert_eq!(b.peer_ids(), vec![PeerId::from("a")]);
    }

    #[tokio::test]
    async fn test_broadcast_and_unicast() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let b = hub.connect("b");
        let c = hub.connect("c");
        let mut b_events = b.subscribe();
        let mut c_events = c.subscribe();

        a.send(Message::HostQuery, None).unwrap();
        a.send(Message::HostAnnounce { host_id: "a".into() }, Some(&"c".into())).unwrap();

        // b's backlog holds a's join from connect, then c's
        assert_eq!(b_events.recv().await, Some(TransportEvent::PeerJoined("a".into())));
        assert_eq!(b_events.recv().await, Some(TransportEvent::PeerJoined("c".into())));
        assert_eq!(
            b_events.recv().await,
            Some(TransportEvent::Message { from: "a".into(), message: Message::HostQuery })
        );
        assert_eq!(c_events.recv().await, Some(TransportEvent::PeerJoined("a".into())));
        assert_eq!(c_events.recv().await, Some(TransportEvent::PeerJoined("b".into())));
        assert_eq!(
            c_events.recv().await,
            Some(TransportEvent::Message { from: "a".into(), message: Message::HostQuery })
        );
        assert_eq!(
            c_events.recv().await,
            Some(TransportEvent::Message {
                from: "a".into(),
                message: Message::HostAnnounce { host_id: "a".into() }
            })
        );
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_peer_fails() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let err = a.send(Message::HostQuery, Some(&"ghost".into())).unwrap_err();
        assert_eq!(err, TransportError::PeerNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn test_disconnect_emits_leave_and_closes() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let b = hub.connect("b");
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        b.disconnect().await;

        assert_eq!(a_events.recv().await, Some(TransportEvent::PeerJoined("b".into())));
        assert_eq!(a_events.recv().await, Some(TransportEvent::PeerLeft("b".into())));
        assert_eq!(b_events.recv().await, Some(TransportEvent::PeerJoined("a".into())));
        assert_eq!(
            b_events.recv().await,
            Some(TransportEvent::ConnectionState(ConnectionState::Disconnected))
        );
        assert_eq!(b_events.recv().await, None);
        assert_eq!(b.connection_state(), ConnectionState::Disconnected);
        assert_eq!(b.send(Message::HostQuery, None), Err(TransportError::NotConnected));
        assert!(a.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_severed_endpoint_goes_silent() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let b = hub.connect("b");
        let mut a_events = a.subscribe();
        assert_eq!(a_events.recv().await, Some(TransportEvent::PeerJoined("b".into())));

        hub.sever(&"b".into());
        b.send(Message::Event { event_name: "ping".into(), payload: json!(1) }, None).unwrap();
        a.send(Message::HostQuery, None).unwrap();

        // a still lists b: nothing told it otherwise
        assert_eq!(a.peer_ids(), vec![PeerId::from("b")]);
        assert!(a_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_injected_error_reaches_subscribers() {
        let hub = MemoryHub::new();
        let a = hub.connect("a");
        let mut events = a.subscribe();
        hub.inject_error(&"a".into(), TransportError::Network("ice failed".into()));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Error(TransportError::Network("ice failed".into())))
        );
    }
}
