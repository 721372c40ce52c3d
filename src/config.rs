//! Service configuration.
//!
//! Settings load from environment variables over built-in defaults and
//! validate before the service starts. Limits here cap what individual
//! submissions may request; the dispatcher and broker read their knobs
//! from the same struct so one config describes a whole deployment.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::submission::ResourceLimits;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the judge service.
#[derive(Debug, Clone)]
pub struct Settings {
    // Storage settings
    /// PostgreSQL database connection URL.
    pub database_url: String,
    /// Redis broker connection URL.
    pub redis_url: String,

    // Sandbox settings
    /// Path to the sandbox engine binary.
    pub rustbox_path: PathBuf,

    // Worker settings
    /// Maximum number of submissions a worker executes concurrently.
    pub worker_concurrency: usize,
    /// Idle sleep between empty queue polls.
    pub poll_interval: Duration,
    /// Backoff after a failed poll iteration.
    pub error_backoff: Duration,

    // Heartbeat settings
    /// Registry entries older than this are purged.
    pub heartbeat_ttl: Duration,
    /// Workers unseen for longer than this stop counting as live.
    pub heartbeat_active_window: Duration,

    // Resource limit settings
    /// Limits applied when a submission requests none.
    pub default_limits: ResourceLimits,
    /// Upper bound on what a submission may request.
    pub max_limits: ResourceLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Storage defaults
            database_url: "postgres://localhost/codejudge".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),

            // Sandbox defaults
            rustbox_path: PathBuf::from("rustbox"),

            // Worker defaults
            worker_concurrency: 4,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),

            // Heartbeat defaults
            heartbeat_ttl: Duration::from_secs(300),
            heartbeat_active_window: Duration::from_secs(120),

            // Resource limit defaults
            default_limits: ResourceLimits {
                time_limit_secs: 10,
                memory_limit_mb: 512,
            },
            max_limits: ResourceLimits {
                time_limit_secs: 60,
                memory_limit_mb: 2048,
            },
        }
    }
}

impl Settings {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
    /// - `JUDGE_RUSTBOX_PATH`: Sandbox binary path (default: rustbox)
    /// - `JUDGE_WORKER_CONCURRENCY`: Concurrent executions per worker (default: 4)
    /// - `JUDGE_POLL_INTERVAL_SECS`: Idle poll interval in seconds (default: 1)
    /// - `JUDGE_ERROR_BACKOFF_SECS`: Poll error backoff in seconds (default: 5)
    /// - `JUDGE_HEARTBEAT_TTL_SECS`: Heartbeat purge TTL in seconds (default: 300)
    /// - `JUDGE_HEARTBEAT_ACTIVE_SECS`: Liveness window in seconds (default: 120)
    /// - `JUDGE_DEFAULT_TIME_LIMIT_SECS`: Default time limit (default: 10)
    /// - `JUDGE_DEFAULT_MEMORY_LIMIT_MB`: Default memory limit (default: 512)
    /// - `JUDGE_MAX_TIME_LIMIT_SECS`: Maximum requestable time limit (default: 60)
    /// - `JUDGE_MAX_MEMORY_LIMIT_MB`: Maximum requestable memory limit (default: 2048)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have
    /// invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("JUDGE_RUSTBOX_PATH") {
            config.rustbox_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("JUDGE_WORKER_CONCURRENCY") {
            config.worker_concurrency = parse_env_value(&val, "JUDGE_WORKER_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("JUDGE_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("JUDGE_ERROR_BACKOFF_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_ERROR_BACKOFF_SECS")?;
            config.error_backoff = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("JUDGE_HEARTBEAT_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_HEARTBEAT_TTL_SECS")?;
            config.heartbeat_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("JUDGE_HEARTBEAT_ACTIVE_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_HEARTBEAT_ACTIVE_SECS")?;
            config.heartbeat_active_window = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("JUDGE_DEFAULT_TIME_LIMIT_SECS") {
            config.default_limits.time_limit_secs =
                parse_env_value(&val, "JUDGE_DEFAULT_TIME_LIMIT_SECS")?;
        }

        if let Ok(val) = std::env::var("JUDGE_DEFAULT_MEMORY_LIMIT_MB") {
            config.default_limits.memory_limit_mb =
                parse_env_value(&val, "JUDGE_DEFAULT_MEMORY_LIMIT_MB")?;
        }

        if let Ok(val) = std::env::var("JUDGE_MAX_TIME_LIMIT_SECS") {
            config.max_limits.time_limit_secs =
                parse_env_value(&val, "JUDGE_MAX_TIME_LIMIT_SECS")?;
        }

        if let Ok(val) = std::env::var("JUDGE_MAX_MEMORY_LIMIT_MB") {
            config.max_limits.memory_limit_mb =
                parse_env_value(&val, "JUDGE_MAX_MEMORY_LIMIT_MB")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.rustbox_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "rustbox_path cannot be empty".to_string(),
            ));
        }

        if self.worker_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_active_window > self.heartbeat_ttl {
            return Err(ConfigError::ValidationFailed(
                "heartbeat_active_window cannot exceed heartbeat_ttl".to_string(),
            ));
        }

        if self.default_limits.time_limit_secs == 0 || self.default_limits.memory_limit_mb == 0 {
            return Err(ConfigError::ValidationFailed(
                "default limits must be greater than 0".to_string(),
            ));
        }

        if self.default_limits.time_limit_secs > self.max_limits.time_limit_secs {
            return Err(ConfigError::ValidationFailed(
                "default time limit cannot exceed max time limit".to_string(),
            ));
        }

        if self.default_limits.memory_limit_mb > self.max_limits.memory_limit_mb {
            return Err(ConfigError::ValidationFailed(
                "default memory limit cannot exceed max memory limit".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the sandbox binary path.
    pub fn with_rustbox_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rustbox_path = path.into();
        self
    }

    /// Builder method to set worker concurrency.
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the default resource limits.
    pub fn with_default_limits(mut self, limits: ResourceLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Builder method to set the maximum resource limits.
    pub fn with_max_limits(mut self, limits: ResourceLimits) -> Self {
        self.max_limits = limits;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Settings::default();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
        assert_eq!(config.heartbeat_ttl, Duration::from_secs(300));
        assert_eq!(config.heartbeat_active_window, Duration::from_secs(120));
        assert_eq!(config.default_limits.time_limit_secs, 10);
        assert_eq!(config.default_limits.memory_limit_mb, 512);
        assert_eq!(config.max_limits.time_limit_secs, 60);
        assert_eq!(config.max_limits.memory_limit_mb, 2048);
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let config = Settings::default().with_worker_concurrency(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("worker_concurrency"));
    }

    #[test]
    fn test_validation_empty_database_url() {
        let config = Settings::default().with_database_url("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("database_url"));
    }

    #[test]
    fn test_validation_empty_redis_url() {
        let config = Settings::default().with_redis_url("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("redis_url"));
    }

    #[test]
    fn test_validation_default_limits_exceed_max() {
        let config = Settings::default().with_default_limits(ResourceLimits {
            time_limit_secs: 120,
            memory_limit_mb: 512,
        });
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("default time limit"));
    }

    #[test]
    fn test_validation_active_window_exceeds_ttl() {
        let mut config = Settings::default();
        config.heartbeat_active_window = Duration::from_secs(600);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("heartbeat_active_window"));
    }

    #[test]
    fn test_builder_methods() {
        let config = Settings::new()
            .with_database_url("postgres://test/db")
            .with_redis_url("redis://test:6379")
            .with_rustbox_path("/usr/local/bin/rustbox")
            .with_worker_concurrency(8)
            .with_poll_interval(Duration::from_millis(500));

        assert_eq!(config.database_url, "postgres://test/db");
        assert_eq!(config.redis_url, "redis://test:6379");
        assert_eq!(config.rustbox_path, PathBuf::from("/usr/local/bin/rustbox"));
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("DATABASE_URL".to_string());
        assert!(err.to_string().contains("DATABASE_URL"));

        let err = ConfigError::InvalidValue {
            key: "JUDGE_WORKER_CONCURRENCY".to_string(),
            message: "could not parse 'lots'".to_string(),
        };
        assert!(err.to_string().contains("JUDGE_WORKER_CONCURRENCY"));
    }
}
