//! Configuration for the force sync client
//!
//! Defaults, then an optional TOML file, then `FORCESYNC_*` environment
//! variables. Durations use humantime notation (`"1s"`, `"250ms"`).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "FORCESYNC_";

/// Main client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync service endpoint
    pub server: ServerConfig,

    /// Reconnect backoff
    pub reconnect: ReconnectConfig,

    /// Request/response timings
    pub rpc: RpcConfig,

    /// Save debouncing
    pub replication: ReplicationConfig,

    /// Local persistence
    pub store: StoreConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` of the sync service
    pub endpoint: String,

    /// Upper bound for a single connection attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Reconnect delay grows as `base_delay * factor^attempt`, capped at `max_delay`,
/// plus a random extra of up to `jitter` times the delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub factor: f64,

    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long `send_and_wait` waits for a reply
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// How long a save waits for the channel to open
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Inbound action reported to the error callback
    pub error_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Quiet period before a scheduled save goes out
    #[serde(with = "humantime_serde")]
    pub save_debounce: Duration,

    /// Quiet period before a tracked force's edits are persisted
    #[serde(with = "humantime_serde")]
    pub change_debounce: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for force files; in-memory store when unset
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level name (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7420".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 1.8,
            jitter: 0.5,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            error_action: "error".to_string(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_secs(1),
            change_debounce: Duration::from_millis(300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| ConfigError::invalid(key, e))
}

fn parse_duration_var(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::invalid(key, e))
}

impl SyncConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Variables follow `FORCESYNC_<SECTION>_<KEY>`, e.g.
    /// `FORCESYNC_SERVER_ENDPOINT=sync.example.net:7420`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which receives keys without the prefix
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERVER_ENDPOINT") {
            self.server.endpoint = v;
        }
        if let Some(v) = lookup("SERVER_CONNECT_TIMEOUT") {
            self.server.connect_timeout = parse_duration_var("SERVER_CONNECT_TIMEOUT", &v)?;
        }

        if let Some(v) = lookup("RECONNECT_BASE_DELAY") {
            self.reconnect.base_delay = parse_duration_var("RECONNECT_BASE_DELAY", &v)?;
        }
        if let Some(v) = lookup("RECONNECT_MAX_DELAY") {
            self.reconnect.max_delay = parse_duration_var("RECONNECT_MAX_DELAY", &v)?;
        }
        if let Some(v) = lookup("RECONNECT_FACTOR") {
            self.reconnect.factor = parse_var("RECONNECT_FACTOR", &v)?;
        }
        if let Some(v) = lookup("RECONNECT_JITTER") {
            self.reconnect.jitter = parse_var("RECONNECT_JITTER", &v)?;
        }

        if let Some(v) = lookup("RPC_CALL_TIMEOUT") {
            self.rpc.call_timeout = parse_duration_var("RPC_CALL_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("RPC_READY_TIMEOUT") {
            self.rpc.ready_timeout = parse_duration_var("RPC_READY_TIMEOUT", &v)?;
        }

        if let Some(v) = lookup("REPLICATION_SAVE_DEBOUNCE") {
            self.replication.save_debounce = parse_duration_var("REPLICATION_SAVE_DEBOUNCE", &v)?;
        }
        if let Some(v) = lookup("REPLICATION_CHANGE_DEBOUNCE") {
            self.replication.change_debounce =
                parse_duration_var("REPLICATION_CHANGE_DEBOUNCE", &v)?;
        }

        if let Some(v) = lookup("STORE_DATA_DIR") {
            self.store.data_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = lookup("LOG_JSON") {
            self.logging.json_format = parse_var("LOG_JSON", &v)?;
        }

        Ok(())
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationFailed(msg.to_string()));

        if self.server.endpoint.trim().is_empty() {
            return fail("server.endpoint must not be empty");
        }
        if self.server.connect_timeout.is_zero() {
            return fail("server.connect_timeout must be greater than 0");
        }

        if self.reconnect.base_delay.is_zero() {
            return fail("reconnect.base_delay must be greater than 0");
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return fail("reconnect.max_delay must not be below reconnect.base_delay");
        }
        if !(self.reconnect.factor >= 1.0) {
            return fail("reconnect.factor must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return fail("reconnect.jitter must be within [0, 1]");
        }

        if self.rpc.call_timeout.is_zero() || self.rpc.ready_timeout.is_zero() {
            return fail("rpc timeouts must be greater than 0");
        }

        if crate::logging::LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect.factor, 1.8);
        assert_eq!(config.replication.save_debounce, Duration::from_secs(1));
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        config.server.endpoint = " ".to_string();
        assert!(config.validate().is_err());

        config = SyncConfig::default();
        config.reconnect.factor = 0.5;
        assert!(config.validate().is_err());

        config = SyncConfig::default();
        config.reconnect.jitter = 1.5;
        assert!(config.validate().is_err());

        config = SyncConfig::default();
        config.reconnect.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());

        config = SyncConfig::default();
        config.rpc.call_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = SyncConfig::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SERVER_ENDPOINT", "sync.example.net:9000"),
            ("RECONNECT_MAX_DELAY", "1m"),
            ("REPLICATION_SAVE_DEBOUNCE", "250ms"),
            ("STORE_DATA_DIR", "/tmp/forces"),
            ("LOG_LEVEL", "DEBUG"),
        ]);
        let mut config = SyncConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.endpoint, "sync.example.net:9000");
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.replication.save_debounce, Duration::from_millis(250));
        assert_eq!(config.store.data_dir, Some(PathBuf::from("/tmp/forces")));
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_env(|key| (key == "RECONNECT_FACTOR").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RECONNECT_FACTOR"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forcesync.toml");

        let mut config = SyncConfig::default();
        config.server.endpoint = "10.0.0.5:7420".to_string();
        config.rpc.call_timeout = Duration::from_secs(3);
        config.save_to_file(&path).unwrap();

        assert_eq!(SyncConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[server]\nendpoint = \"example.org:1\"\n\n[reconnect]\nmax_delay = \"5s\"\n").unwrap();

        let config = SyncConfig::from_file(&path).unwrap();
        assert_eq!(config.server.endpoint, "example.org:1");
        assert_eq!(config.server.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
    }
}
