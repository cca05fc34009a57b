//! Wire messages
//!
//! Messages travel as JSON objects tagged by `type`:
//!
//! ```text
//! {"type":"state_sync","fullState":{..}}     {"type":"state_sync","patches":[..]}
//! {"type":"action","actionName":..,"input":..,"context":{..},"actionSeed":7}
//! {"type":"event","eventName":..,"payload":..}
//! {"type":"host_query"}                       {"type":"host_announce","hostId":..}
//! {"type":"health_ping","timestamp":..}       {"type":"health_pong","timestamp":..}
//! {"type":"host_migration","newHost":..}
//! ```

use super::error::TransportResult;
use super::PeerId;
use crate::core_diff::{Patch, Value};
use serde::{Deserialize, Serialize};

/// Body of a `state_sync` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateSyncPayload {
    /// Whole-tree replacement, used for peers that just joined
    FullState(Value),
    /// Ordered edits produced by one sync cycle
    Patches(Vec<Patch>),
}

/// Who submitted an action, as seen by the submitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContext {
    pub player_id: PeerId,
    pub target_id: PeerId,
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    StateSync {
        #[serde(flatten)]
        payload: StateSyncPayload,
    },
    #[serde(rename_all = "camelCase")]
    Action {
        action_name: String,
        input: Value,
        context: WireContext,
        action_seed: u64,
    },
    #[serde(rename_all = "camelCase")]
    Event { event_name: String, payload: Value },
    HostQuery,
    #[serde(rename_all = "camelCase")]
    HostAnnounce { host_id: PeerId },
    HealthPing { timestamp: u64 },
    HealthPong { timestamp: u64 },
    /// Accepted for compatibility; the sticky-host protocol never sends it
    #[serde(rename_all = "camelCase")]
    HostMigration { new_host: PeerId },
}

impl Message {
    pub fn full_state(state: Value) -> Self {
        Message::StateSync { payload: StateSyncPayload::FullState(state) }
    }

    pub fn patches(patches: Vec<Patch>) -> Self {
        Message::StateSync { payload: StateSyncPayload::Patches(patches) }
    }

    /// Wire name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StateSync { .. } => "state_sync",
            Message::Action { .. } => "action",
            Message::Event { .. } => "event",
            Message::HostQuery => "host_query",
            Message::HostAnnounce { .. } => "host_announce",
            Message::HealthPing { .. } => "health_ping",
            Message::HealthPong { .. } => "health_pong",
            Message::HostMigration { .. } => "host_migration",
        }
    }

    /// Liveness traffic that the health monitor consumes
    pub fn is_health(&self) -> bool {
        matches!(self, Message::HealthPing { .. } | Message::HealthPong { .. })
    }

    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> TransportResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_sync_patches_wire_shape() {
        let msg = Message::patches(vec![Patch::replace(vec!["count".into()], json!(1))]);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "state_sync",
                "patches": [{"op": "replace", "path": ["count"], "value": 1}]
            })
        );
    }

    #[test]
    fn test_state_sync_full_state_round_trip() {
        let msg = Message::full_state(json!({"count": 3}));
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire, json!({"type": "state_sync", "fullState": {"count": 3}}));

        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_action_wire_shape() {
        let msg = Message::Action {
            action_name: "roll".into(),
            input: json!({"sides": 6}),
            context: WireContext {
                player_id: "b".into(),
                target_id: "b".into(),
                is_host: false,
            },
            action_seed: 42,
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "action");
        assert_eq!(wire["actionName"], "roll");
        assert_eq!(wire["actionSeed"], 42);
        assert_eq!(wire["context"]["playerId"], "b");
        assert_eq!(wire["context"]["isHost"], false);
        assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_protocol_messages_decode() {
        let query = Message::decode(br#"{"type":"host_query"}"#).unwrap();
        assert_eq!(query, Message::HostQuery);

        let announce = Message::decode(br#"{"type":"host_announce","hostId":"a"}"#).unwrap();
        assert_eq!(announce, Message::HostAnnounce { host_id: "a".into() });

        let migration = Message::decode(br#"{"type":"host_migration","newHost":"c"}"#).unwrap();
        assert_eq!(migration.kind(), "host_migration");

        let ping = Message::decode(br#"{"type":"health_ping","timestamp":10}"#).unwrap();
        assert!(ping.is_health());
    }

    #[test]
    fn test_unknown_kind_is_codec_error() {
        assert!(Message::decode(br#"{"type":"teleport"}"#).is_err());
    }
}
