//! Contexts handed to user code

use crate::core_random::DeterministicRandom;
use crate::core_transport::{PeerId, WireContext};

/// Everything an action handler learns about its invocation
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Who submitted the action
    pub player_id: PeerId,
    /// Who the action affects; the submitter unless given
    pub target_id: PeerId,
    /// Whether the peer running the handler is the host
    pub is_host: bool,
    /// Generator seeded with the action seed, identical on every applier
    pub random: DeterministicRandom,
}

impl ActionContext {
    pub fn new(player_id: PeerId, target_id: Option<PeerId>, is_host: bool, seed: u64) -> Self {
        let target_id = target_id.unwrap_or_else(|| player_id.clone());
        Self { player_id, target_id, is_host, random: DeterministicRandom::new(seed) }
    }

    /// Rebuild the context on the host from what the submitter sent
    pub(crate) fn from_wire(wire: WireContext, seed: u64) -> Self {
        Self {
            player_id: wire.player_id,
            target_id: wire.target_id,
            is_host: true,
            random: DeterministicRandom::new(seed),
        }
    }

    pub(crate) fn to_wire(&self) -> WireContext {
        WireContext {
            player_id: self.player_id.clone(),
            target_id: self.target_id.clone(),
            is_host: self.is_host,
        }
    }
}

/// Input to the setup routine
#[derive(Debug, Clone)]
pub struct SetupContext {
    /// Self and every peer reachable at construction, sorted
    pub player_ids: Vec<PeerId>,
    /// Generator seeded with the shared setup seed
    pub random: DeterministicRandom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults_to_player() {
        let ctx = ActionContext::new("alice".into(), None, false, 42);
        assert_eq!(ctx.target_id, PeerId::from("alice"));

        let ctx = ActionContext::new("alice".into(), Some("bob".into()), false, 42);
        assert_eq!(ctx.target_id, PeerId::from("bob"));
    }

    #[test]
    fn test_rebuilt_context_draws_same_numbers() {
        let mut local = ActionContext::new("alice".into(), None, false, 42);
        let mut remote = ActionContext::from_wire(local.to_wire(), 42);

        assert!(remote.is_host);
        assert_eq!(remote.player_id, local.player_id);
        assert_eq!(local.random.range(0, 100), remote.random.range(0, 100));
    }
}
