//! In-memory session driver behind `peersync simulate`

use anyhow::{bail, ensure, Context, Result};
use peersync_core::config::Config;
use peersync_core::core_election::HostElection;
use peersync_core::core_random::DeterministicRandom;
use peersync_core::core_runtime::{Definition, SyncRuntime};
use peersync_core::core_transport::{MemoryHub, PeerId, PeerTransport};
use peersync_core::health::MonitoredTransport;
use peersync_core::{generate_diff, Value};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of a converged simulation
#[derive(Debug)]
pub struct Report {
    pub host: PeerId,
    pub states: BTreeMap<PeerId, Value>,
    pub elapsed: Duration,
}

struct Peer {
    transport: Arc<MonitoredTransport>,
    election: HostElection,
    runtime: SyncRuntime,
}

/// Counter and dice game played by the simulated peers
fn definition() -> Definition {
    Definition::new()
        .setup(|ctx| json!({ "count": 0, "rolls": {}, "players": ctx.player_ids }))
        .action("increment", |state, _ctx, _input| {
            let count = state["count"].as_i64().unwrap_or(0);
            state["count"] = json!(count + 1);
            Ok(())
        })
        .action("roll", |state, ctx, _input| {
            let value = ctx.random.range(1, 7);
            let rolls = &mut state["rolls"][ctx.player_id.as_str()];
            let total = rolls.as_i64().unwrap_or(0);
            *rolls = json!(total + value);
            Ok(())
        })
}

pub async fn run(config: &Config, peers: usize, actions: usize, seed: u64) -> Result<Report> {
    ensure!(peers > 0, "at least one peer is needed");
    let started = Instant::now();
    let hub = MemoryHub::new();
    let ids: Vec<PeerId> = (0..peers).map(|i| PeerId::new(format!("peer-{}", i))).collect();

    let transports: Vec<Arc<MonitoredTransport>> = ids
        .iter()
        .map(|id| Arc::new(MonitoredTransport::wrap(hub.connect(id.clone()), config.health.clone())))
        .collect();
    let elections: Vec<HostElection> = transports
        .iter()
        .map(|t| {
            let transport: Arc<dyn PeerTransport> = t.clone();
            HostElection::start(transport, &config.election)
        })
        .collect();

    let wait = config.election.discovery_timeout * 2 + Duration::from_secs(1);
    let mut agreed = Vec::with_capacity(peers);
    for election in &elections {
        let host = tokio::time::timeout(wait, election.wait_for_host())
            .await
            .context("no host agreed in time")??;
        agreed.push((election.player_id(), host));
    }
    let host = agreed[0].1.clone();
    if let Some((id, other)) = agreed.iter().find(|(_, other)| *other != host) {
        bail!("{} chose {} while others chose {}", id, other, host);
    }
    debug!(host = %host, "host agreed");

    let mut session = Vec::with_capacity(peers);
    for (transport, election) in transports.into_iter().zip(elections) {
        let shared: Arc<dyn PeerTransport> = transport.clone();
        let runtime = SyncRuntime::start(definition(), shared, election.is_host(), &config.sync)?;
        session.push(Peer { transport, election, runtime });
    }

    let mut random = DeterministicRandom::new(seed);
    for _ in 0..actions {
        let peer = random.choice(&session)?;
        let action = if random.boolean(0.5) { "increment" } else { "roll" };
        peer.runtime.submit_action(action, Value::Null, None).await?;
        tokio::time::sleep(config.sync.sync_interval / 4).await;
    }
    tokio::time::sleep(config.sync.sync_interval * 4).await;

    let mut states = BTreeMap::new();
    for peer in &session {
        states.insert(peer.runtime.my_player_id(), peer.runtime.state().await);
    }

    for peer in &session {
        peer.runtime.destroy().await;
        peer.election.destroy().await;
        peer.transport.disconnect().await;
    }

    if let Some(reference) = states.get(&host) {
        for (id, state) in &states {
            let patches = generate_diff(reference, state);
            ensure!(patches.is_empty(), "{} diverged from host: {}", id, serde_json::to_string(&patches)?);
        }
    }

    Ok(Report { host, states, elapsed: started.elapsed() })
}
