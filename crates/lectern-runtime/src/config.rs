//! Runtime configuration.
//!
//! Read once at process start and never re-validated per call. Every section
//! is optional; missing fields take their defaults. Durations are written in
//! human-readable form (`"500ms"`, `"30s"`, `"1h"`).
//!
//! ```yaml
//! default_provider: anthropic
//! retry:
//!   max_attempts: 3
//!   delay: 500ms
//!   backoff_multiplier: 2.0
//! circuit_breaker:
//!   failure_threshold: 5
//!   cooldown: 30s
//! cache:
//!   ttl: 1h
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::metrics::MetricsConfig;
use crate::providers::CompletionConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Logging verbosity switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log rendered prompts at debug level
    pub log_prompts: bool,

    /// Log raw backend responses at debug level
    pub log_responses: bool,

    /// Log quality warnings at warn level
    pub log_quality_warnings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_prompts: false,
            log_responses: false,
            log_quality_warnings: true,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider used when a call does not name one
    pub default_provider: String,

    /// Default retry policy
    pub retry: RetryPolicy,

    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,

    /// Result cache settings
    pub cache: CacheConfig,

    /// Default completion parameters
    pub completion: CompletionConfig,

    /// Metrics recorder settings
    pub metrics: MetricsConfig,

    /// Logging switches
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_provider: "anthropic".to_string(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            completion: CompletionConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Use a different default provider.
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = provider.into();
        self
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_provider.trim().is_empty() {
            return Err(ConfigError::Invalid("default_provider must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be at least 1".into()));
        }
        Ok(())
    }
}

/// Serde adapter for `Duration` as a humantime string.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.logging.log_quality_warnings);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
default_provider: scripted
retry:
  max_attempts: 5
  delay: 250ms
circuit_breaker:
  cooldown: 1m
cache:
  ttl: 2h
"#;
        let config = RuntimeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.default_provider, "scripted");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.cache.ttl, Duration::from_secs(7200));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = RuntimeConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("cooldown: 30s"));
        assert_eq!(RuntimeConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let result = RuntimeConfig::from_yaml_str("retry:\n  max_attempts: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let result = RuntimeConfig::from_yaml_str("retry:\n  backoff_multiplier: 0.5\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let result = RuntimeConfig::from_yaml_str("cache:\n  ttl: soon\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = RuntimeConfig::from_yaml_file("/nonexistent/lectern.yaml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
