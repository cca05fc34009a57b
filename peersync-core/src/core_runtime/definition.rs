//! Game definitions: initial state and named actions

use super::context::{ActionContext, SetupContext};
use crate::core_diff::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds the initial state tree
pub type SetupFn = dyn Fn(&mut SetupContext) -> Value + Send + Sync;

/// Mutates the state tree for one action invocation
pub type ActionFn =
    dyn Fn(&mut Value, &mut ActionContext, &Value) -> anyhow::Result<()> + Send + Sync;

/// Setup routine plus the name → action table, fixed once a runtime starts
///
/// # Example
/// ```
/// use peersync_core::core_runtime::Definition;
/// use serde_json::json;
///
/// let definition = Definition::new()
///     .setup(|_| json!({ "count": 0 }))
///     .action("increment", |state, _ctx, _input| {
///         let count = state["count"].as_i64().unwrap_or(0);
///         state["count"] = json!(count + 1);
///         Ok(())
///     });
/// assert_eq!(definition.action_names(), vec!["increment".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct Definition {
    setup: Option<Arc<SetupFn>>,
    actions: BTreeMap<String, Arc<ActionFn>>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the setup routine. Without one the state starts as `{}`.
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SetupContext) -> Value + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Register an action; a second registration under the same name replaces the first
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Value, &mut ActionContext, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Registered action names, sorted
    pub fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub(crate) fn get_action(&self, name: &str) -> Option<Arc<ActionFn>> {
        self.actions.get(name).cloned()
    }

    pub(crate) fn initial_state(&self, ctx: &mut SetupContext) -> Value {
        match &self.setup {
            Some(setup) => setup(ctx),
            None => Value::Object(Default::default()),
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("setup", &self.setup.is_some())
            .field("actions", &self.action_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_random::DeterministicRandom;
    use serde_json::json;

    #[test]
    fn test_default_initial_state_is_empty_object() {
        let mut ctx = SetupContext { player_ids: Vec::new(), random: DeterministicRandom::new(1) };
        assert_eq!(Definition::new().initial_state(&mut ctx), json!({}));
    }

    #[test]
    fn test_setup_sees_players() {
        let definition = Definition::new().setup(|ctx| json!({ "players": ctx.player_ids.len() }));
        let mut ctx = SetupContext {
            player_ids: vec!["a".into(), "b".into()],
            random: DeterministicRandom::new(1),
        };
        assert_eq!(definition.initial_state(&mut ctx), json!({ "players": 2 }));
    }

    #[test]
    fn test_action_registration() {
        let definition = Definition::new()
            .action("roll", |_, _, _| Ok(()))
            .action("increment", |_, _, _| Ok(()));

        assert_eq!(definition.action_names(), vec!["increment", "roll"]);
        assert!(definition.has_action("roll"));
        assert!(definition.get_action("reset").is_none());
    }
}
