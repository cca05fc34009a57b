//! Configuration error types

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write configuration file {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl ConfigError {
    pub(crate) fn read(path: &Path, e: std::io::Error) -> Self {
        ConfigError::Read { path: path.display().to_string(), reason: e.to_string() }
    }

    pub(crate) fn write(path: &Path, e: std::io::Error) -> Self {
        ConfigError::Write { path: path.display().to_string(), reason: e.to_string() }
    }
}
