//! Host election convergence under shuffled join and start orders

use peersync_core::config::{ElectionConfig, ElectionMode};
use peersync_core::core_election::HostElection;
use peersync_core::core_transport::{MemoryHub, Message, PeerId, PeerTransport};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const DISCOVERY: Duration = Duration::from_secs(3);
const MARGIN: Duration = Duration::from_millis(100);

fn auto() -> ElectionConfig {
    ElectionConfig { mode: ElectionMode::Auto, discovery_timeout: DISCOVERY }
}

fn random_ids(rng: &mut StdRng) -> Vec<PeerId> {
    let count = rng.random_range(2..=7);
    let mut ids = BTreeSet::new();
    while ids.len() < count {
        ids.insert(PeerId::new(format!("peer-{:03}", rng.random_range(0..1000))));
    }
    ids.into_iter().collect()
}

#[tokio::test(start_paused = true)]
async fn test_shuffled_starts_agree_on_smallest_id() {
    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ids = random_ids(&mut rng);
        let smallest = ids[0].clone();

        ids.shuffle(&mut rng);
        let hub = MemoryHub::new();
        let transports: Vec<_> = ids.iter().map(|id| Arc::new(hub.connect(id.clone()))).collect();

        let mut order: Vec<usize> = (0..transports.len()).collect();
        order.shuffle(&mut rng);

        let mut elections = Vec::new();
        let mut elapsed = Duration::ZERO;
        for index in order {
            let delay = Duration::from_millis(rng.random_range(0..2_000));
            tokio::time::sleep(delay).await;
            elapsed += delay;
            let transport: Arc<dyn PeerTransport> = transports[index].clone();
            elections.push(HostElection::start(transport, &auto()));
        }

        // bound: one discovery window after the last start
        tokio::time::sleep(DISCOVERY + MARGIN).await;

        for election in &elections {
            assert_eq!(
                election.host(),
                Some(smallest.clone()),
                "seed {} peer {} disagrees after {:?}",
                seed,
                election.player_id(),
                elapsed + DISCOVERY
            );
        }
        assert_eq!(elections.iter().filter(|e| e.is_host()).count(), 1, "seed {}", seed);

        for election in &elections {
            election.destroy().await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_claim_converges_in_one_round_trip() {
    let hub = MemoryHub::new();
    let ids = ["peer-b", "peer-c", "peer-d"];
    let transports: Vec<_> = ids.iter().map(|id| Arc::new(hub.connect(*id))).collect();
    let elections: Vec<_> = transports
        .iter()
        .map(|t| HostElection::start(t.clone(), &auto()))
        .collect();
    tokio::time::sleep(DISCOVERY + MARGIN).await;
    assert!(elections.iter().all(|e| e.host() == Some(PeerId::from("peer-b"))));

    // a peer from another partition claims to be host
    let rival = hub.connect("peer-a");
    rival.send(Message::HostAnnounce { host_id: "peer-a".into() }, None).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    for election in &elections {
        assert_eq!(election.host(), Some(PeerId::from("peer-a")));
        assert!(!election.is_host());
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_keeps_existing_host() {
    let hub = MemoryHub::new();
    let first = HostElection::start(Arc::new(hub.connect("peer-m")), &auto());
    let second = HostElection::start(Arc::new(hub.connect("peer-z")), &auto());
    tokio::time::sleep(DISCOVERY + MARGIN).await;
    assert!(first.is_host());

    // smaller id, but a host is already agreed
    let late = HostElection::start(Arc::new(hub.connect("peer-a")), &auto());
    tokio::time::sleep(DISCOVERY + MARGIN).await;

    for election in [&first, &second, &late] {
        assert_eq!(election.host(), Some(PeerId::from("peer-m")));
    }
}
