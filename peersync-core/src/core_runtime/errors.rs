//! Runtime error types

use super::suggest::suggest;
use crate::core_transport::TransportError;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No action registered under `name`
    #[error("{}", describe_unknown(.name, .known, .suggestion.as_deref()))]
    UnknownAction {
        name: String,
        known: Vec<String>,
        suggestion: Option<String>,
    },

    /// A mirror attempted something only the host may do
    #[error("Only the host may {0}")]
    HostOnly(&'static str),

    /// The action handler returned an error or panicked
    #[error("Action '{name}' failed: {source}")]
    ActionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The setup routine panicked
    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RuntimeError {
    /// Build an [`RuntimeError::UnknownAction`] with a suggestion when one is close enough
    pub fn unknown_action(name: &str, known: Vec<String>) -> Self {
        let suggestion = suggest(name, known.iter().map(String::as_str)).map(str::to_string);
        RuntimeError::UnknownAction { name: name.to_string(), known, suggestion }
    }

    /// Whether this is a validation failure subject to strict mode
    pub fn is_validation(&self) -> bool {
        matches!(self, RuntimeError::UnknownAction { .. } | RuntimeError::HostOnly(_))
    }
}

fn describe_unknown(name: &str, known: &[String], suggestion: Option<&str>) -> String {
    let mut message = if known.is_empty() {
        format!("Unknown action \"{}\". No actions are registered.", name)
    } else {
        format!("Unknown action \"{}\". Known actions: {}.", name, known.join(", "))
    };
    if let Some(suggestion) = suggestion {
        message.push_str(&format!(" Did you mean \"{}\"?", suggestion));
    }
    message
}
