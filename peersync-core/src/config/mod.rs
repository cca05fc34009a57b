//! Configuration management for peersync
//!
//! Every tunable of the runtime, host election and health monitor lives
//! here, with defaults, environment overrides, TOML files and validation.

use crate::core_random::SETUP_SEED;
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State synchronization
    pub sync: SyncConfig,

    /// Host election
    pub election: ElectionConfig,

    /// Peer liveness
    pub health: HealthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// State synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the host diffs and broadcasts
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,

    /// Fail loudly on validation errors instead of logging and ignoring them
    pub strict_mode: bool,

    /// Seed handed to the setup routine on every peer
    pub setup_seed: u64,

    /// Seed of the first locally submitted action
    pub first_action_seed: u64,
}

/// How a peer decides who is host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionMode {
    /// Discover, then fall back to the lexicographic tiebreak
    #[default]
    Auto,
    /// This peer is host, no discovery
    Host,
    /// This peer never hosts; it adopts the first peer it meets
    Mirror,
}

impl fmt::Display for ElectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElectionMode::Auto => "auto",
            ElectionMode::Host => "host",
            ElectionMode::Mirror => "mirror",
        };
        f.write_str(name)
    }
}

impl FromStr for ElectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ElectionMode::Auto),
            "host" => Ok(ElectionMode::Host),
            "mirror" | "client" => Ok(ElectionMode::Mirror),
            other => Err(ConfigError::InvalidValue(format!("Unknown election mode: {}", other))),
        }
    }
}

/// Host election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub mode: ElectionMode,

    /// How long automatic discovery waits for a host announcement
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
}

/// Peer health configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Liveness ping period
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Silence after which a peer is evicted
    #[serde(with = "humantime_serde")]
    pub peer_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,

    /// Extra filter directives such as `peersync_core::health=warn`
    pub directives: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(50),
            strict_mode: false,
            setup_seed: SETUP_SEED,
            first_action_seed: 1,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self { mode: ElectionMode::Auto, discovery_timeout: Duration::from_secs(3) }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { ping_interval: Duration::from_secs(5), peer_timeout: Duration::from_secs(15) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
            directives: Vec::new(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, what: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e))),
        Err(_) => Ok(None),
    }
}

fn parse_env_duration(key: &str, what: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: PEERSYNC_<SECTION>_<KEY>
    /// Example: PEERSYNC_SYNC_INTERVAL=100ms
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Sync config
        if let Some(interval) = parse_env_duration("PEERSYNC_SYNC_INTERVAL", "sync interval")? {
            config.sync.sync_interval = interval;
        }
        if let Some(strict) = parse_env("PEERSYNC_SYNC_STRICT_MODE", "strict mode flag")? {
            config.sync.strict_mode = strict;
        }
        if let Some(seed) = parse_env("PEERSYNC_SYNC_SETUP_SEED", "setup seed")? {
            config.sync.setup_seed = seed;
        }

        // Election config
        if let Ok(mode) = env::var("PEERSYNC_ELECTION_MODE") {
            config.election.mode = mode.parse()?;
        }
        if let Some(timeout) =
            parse_env_duration("PEERSYNC_ELECTION_DISCOVERY_TIMEOUT", "discovery timeout")?
        {
            config.election.discovery_timeout = timeout;
        }

        // Health config
        if let Some(interval) = parse_env_duration("PEERSYNC_HEALTH_PING_INTERVAL", "ping interval")? {
            config.health.ping_interval = interval;
        }
        if let Some(timeout) = parse_env_duration("PEERSYNC_HEALTH_PEER_TIMEOUT", "peer timeout")? {
            config.health.peer_timeout = timeout;
        }

        // Logging config
        if let Ok(level) = env::var("PEERSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_env("PEERSYNC_LOG_JSON", "JSON flag")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.sync_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync_interval must be greater than 0".to_string(),
            ));
        }

        if self.election.discovery_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "discovery_timeout must be greater than 0".to_string(),
            ));
        }

        if self.health.ping_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "ping_interval must be greater than 0".to_string(),
            ));
        }

        // A timeout shorter than one ping period evicts healthy peers
        if self.health.peer_timeout <= self.health.ping_interval {
            return Err(ConfigError::ValidationFailed(format!(
                "peer_timeout ({:?}) must exceed ping_interval ({:?})",
                self.health.peer_timeout, self.health.ping_interval
            )));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::write(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.sync_interval, Duration::from_millis(50));
        assert_eq!(config.election.discovery_timeout, Duration::from_secs(3));
        assert_eq!(config.health.ping_interval, Duration::from_secs(5));
        assert_eq!(config.health.peer_timeout, Duration::from_secs(15));
        assert_eq!(config.sync.setup_seed, SETUP_SEED);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.sync.sync_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config = Config::default();
        config.health.peer_timeout = config.health.ping_interval;
        assert!(config.validate().is_err());

        config = Config::default();
        config.election.discovery_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_election_mode_parsing() {
        assert_eq!("HOST".parse::<ElectionMode>().unwrap(), ElectionMode::Host);
        assert_eq!("client".parse::<ElectionMode>().unwrap(), ElectionMode::Mirror);
        assert!("leader".parse::<ElectionMode>().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("peersync.toml");

        let mut config = Config::default();
        config.election.mode = ElectionMode::Mirror;
        config.sync.sync_interval = Duration::from_millis(100);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.election.mode, ElectionMode::Mirror);
        assert_eq!(loaded.sync.sync_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[health]\nping_interval = \"2s\"\npeer_timeout = \"6s\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.health.ping_interval, Duration::from_secs(2));
        assert_eq!(loaded.sync.sync_interval, Duration::from_millis(50));
    }
}
