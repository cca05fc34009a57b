//! Logging subsystem for peersync
//!
//! Structured logging through `tracing`. Components never hold global
//! logging state; each runtime, election and monitor instance logs inside
//! its own span carrying `peer_id`, so several peers in one process (the
//! simulator, the test suites) stay distinguishable.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Output encoding of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Drop the timestamp column; the simulator output diffs cleanly without it
    pub omit_time: bool,
    /// Drop the module path column
    pub omit_target: bool,
    /// Per-module overrides appended after the base level
    pub directives: Vec<String>,
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self { level, ..Default::default() }
    }

    pub fn json_format(self, enabled: bool) -> Self {
        let format = if enabled { LogFormat::Json } else { LogFormat::Text };
        Self { format, ..self }
    }

    pub fn with_timestamp(self, enabled: bool) -> Self {
        Self { omit_time: !enabled, ..self }
    }

    pub fn with_target(self, enabled: bool) -> Self {
        Self { omit_target: !enabled, ..self }
    }

    /// Add a filter directive, e.g. `peersync_core::health=warn` to quiet pings
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build the filter: `RUST_LOG` wins, otherwise level plus directives
    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut rendered = self.level.as_str().to_string();
        for directive in &self.directives {
            rendered.push(',');
            rendered.push_str(directive);
        }
        EnvFilter::try_new(&rendered)
            .map_err(|e| LoggingError::InvalidConfiguration(format!("filter '{}': {}", rendered, e)))
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        let level = config.level.parse::<LogLevel>()?;
        let base = LogConfig::new(level)
            .with_timestamp(config.with_timestamp)
            .with_target(config.with_target)
            .json_format(config.json_format);
        Ok(config.directives.iter().fold(base, |acc, d| acc.directive(d.as_str())))
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// # Example
/// ```
/// use peersync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).directive("peersync_core::health=warn");
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let layer = fmt::layer().with_target(!config.omit_target);
    let registry = tracing_subscriber::registry().with(config.filter()?);

    // the timer and encoder change the layer type, hence one arm per shape
    let result = match (config.format, config.omit_time) {
        (LogFormat::Json, false) => registry.with(layer.json()).try_init(),
        (LogFormat::Json, true) => registry.with(layer.without_time().json()).try_init(),
        (LogFormat::Text, false) => registry.with(layer).try_init(),
        (LogFormat::Text, true) => registry.with(layer.without_time()).try_init(),
    };

    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

/// Best-effort subscriber for tests; repeated calls are ignored
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_plain_text_at_info() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Text);
        assert!(!config.omit_time && !config.omit_target);
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .json_format(true)
            .directive("peersync_core::health=warn");

        assert_eq!(config.format, LogFormat::Json);
        assert!(config.omit_time);
        assert!(!config.omit_target);
        assert_eq!(config.directives, vec!["peersync_core::health=warn"]);
    }

    #[test]
    fn test_from_logging_section() {
        let section = LoggingConfig {
            level: "warn".into(),
            json_format: true,
            directives: vec!["peersync_core::core_election=trace".into()],
            ..Default::default()
        };
        let config = LogConfig::try_from(&section).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directives.len(), 1);

        let bad = LoggingConfig { level: "loud".into(), ..Default::default() };
        assert!(LogConfig::try_from(&bad).is_err());
    }

    #[test]
    fn test_bad_directive_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig::new(LogLevel::Info).directive("peersync_core=loudest");
        assert!(matches!(config.filter(), Err(LoggingError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
