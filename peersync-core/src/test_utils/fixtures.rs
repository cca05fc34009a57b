//! Test fixtures: a small dice-and-counter game and session builders

use crate::config::SyncConfig;
use crate::core_diff::Value;
use crate::core_runtime::{Definition, RuntimeResult, SyncRuntime};
use crate::core_transport::{MemoryHub, MemoryTransport, PeerId, PeerTransport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Ids `peer-0`, `peer-1`, ... in order
pub fn peer_ids(count: usize) -> Vec<PeerId> {
    (0..count).map(|i| PeerId::new(format!("peer-{}", i))).collect()
}

/// Sync settings with a short, known interval
pub fn test_sync_config() -> SyncConfig {
    SyncConfig { sync_interval: Duration::from_millis(50), ..SyncConfig::default() }
}

/// A game exercising every part of the runtime.
///
/// State: `{"count": n, "rolls": [..], "names": {..}, "dealer": id}`
///
/// - `increment {by?}` adds `by` (default 1) to `count`
/// - `roll` draws 1..=6 from the action's generator and records it
/// - `rename {name}` stores `name` under the target's id
/// - `explode` bumps `count`, then fails
pub fn counter_definition() -> Definition {
    Definition::new()
        .setup(|ctx| {
            let dealer = ctx.random.choice(&ctx.player_ids).ok().cloned();
            json!({ "count": 0, "rolls": [], "names": {}, "dealer": dealer })
        })
        .action("increment", |state, _ctx, input| {
            let by = input.get("by").and_then(Value::as_i64).unwrap_or(1);
            let count = state["count"].as_i64().unwrap_or(0);
            state["count"] = json!(count + by);
            Ok(())
        })
        .action("roll", |state, ctx, _input| {
            let value = ctx.random.range(1, 7);
            let rolls = state["rolls"]
                .as_array_mut()
                .ok_or_else(|| anyhow::anyhow!("rolls is not a list"))?;
            rolls.push(json!({ "player": ctx.player_id, "value": value }));
            Ok(())
        })
        .action("rename", |state, ctx, input| {
            let name = input
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("missing name"))?;
            state["names"][ctx.target_id.as_str()] = json!(name);
            Ok(())
        })
        .action("explode", |state, _ctx, _input| {
            let count = state["count"].as_i64().unwrap_or(0);
            state["count"] = json!(count + 100);
            anyhow::bail!("boom")
        })
}

/// Runtimes sharing one in-memory hub
pub struct Session {
    pub hub: MemoryHub,
    pub transports: Vec<Arc<MemoryTransport>>,
    pub runtimes: Vec<SyncRuntime>,
}

impl Session {
    /// Connect every id first, then start one runtime per id. `host` decides
    /// which peer is authoritative.
    pub fn start(
        ids: &[PeerId],
        host: &PeerId,
        definition: Definition,
        config: &SyncConfig,
    ) -> RuntimeResult<Self> {
        let hub = MemoryHub::new();
        let transports: Vec<Arc<MemoryTransport>> =
            ids.iter().map(|id| Arc::new(hub.connect(id.clone()))).collect();

        let mut runtimes = Vec::with_capacity(ids.len());
        for transport in &transports {
            let is_host = transport.player_id() == *host;
            let transport: Arc<dyn PeerTransport> = transport.clone();
            runtimes.push(SyncRuntime::start(definition.clone(), transport, is_host, config)?);
        }
        Ok(Self { hub, transports, runtimes })
    }

    pub fn host(&self) -> Option<&SyncRuntime> {
        self.runtimes.iter().find(|r| r.is_host())
    }

    pub fn mirrors(&self) -> impl Iterator<Item = &SyncRuntime> {
        self.runtimes.iter().filter(|r| !r.is_host())
    }

    pub fn runtime(&self, id: &str) -> Option<&SyncRuntime> {
        self.runtimes.iter().find(|r| r.my_player_id().as_str() == id)
    }

    /// Every peer's current state, in start order
    pub async fn states(&self) -> Vec<Value> {
        let mut states = Vec::with_capacity(self.runtimes.len());
        for runtime in &self.runtimes {
            states.push(runtime.state().await);
        }
        states
    }

    pub async fn destroy(&self) {
        for runtime in &self.runtimes {
            runtime.destroy().await;
        }
    }
}
