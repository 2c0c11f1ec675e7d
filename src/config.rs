//! # Configuration Management
//!
//! Centralized configuration for engines, worker pools, sessions and channels.
//!
//! ## Configuration Sources
//! - TOML files via [`NetworkConfig::from_file`]
//! - Direct instantiation with defaults
//! - Environment overrides (`SESSIONNET_*`) via [`NetworkConfig::from_env`]
//!
//! Durations are (de)serialized as whole milliseconds.
//!
//! ## Example
//! ```toml
//! [workers]
//! work_threads = 4
//! dispatch_threads = 1
//! io_threads = 2
//!
//! [[channels]]
//! name = "game"
//! session_factory = "default"
//! max_session_count = 1000
//! listen_address = "0.0.0.0"
//! listen_port = 10100
//! ```

use crate::core::packet::HEADER_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Initial receive buffer size for new sessions
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 2048;

/// Name of the built-in session factory
pub const DEFAULT_SESSION_FACTORY: &str = "default";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SESSIONNET_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Channels created when the engine starts
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProtocolError::ConfigError(format!("Invalid TOML: {e}")))
    }

    /// Defaults overridden by `SESSIONNET_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SESSIONNET_*` overrides read through `lookup`. Unparsable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(val) = get("WORK_THREADS").and_then(|v| v.parse().ok()) {
            self.workers.work_threads = val;
        }
        if let Some(val) = get("DISPATCH_THREADS").and_then(|v| v.parse().ok()) {
            self.workers.dispatch_threads = val;
        }
        if let Some(val) = get("IO_THREADS").and_then(|v| v.parse().ok()) {
            self.workers.io_threads = val;
        }
        if let Some(val) = get("RECEIVE_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.session.receive_buffer_size = val;
        }
        if let Some(val) = get("CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.session.connect_timeout = Duration::from_millis(val);
        }
        if let Some(val) = get("RESPONSE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.session.response_timeout = Duration::from_millis(val);
        }
        if let Some(val) = get("LOG_LEVEL").and_then(|v| v.parse::<Level>().ok()) {
            self.logging.log_level = val;
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        let example = Self::default_with_overrides(|c| {
            c.channels.push(ChannelConfig {
                name: "main".to_string(),
                listen_port: 10100,
                ..ChannelConfig::default()
            })
        });
        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Write the configuration as pretty TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of problems. Entries starting with `WARNING:` are advisory.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.workers.validate());
        errors.extend(self.session.validate());

        let mut names = HashSet::new();
        for channel in &self.channels {
            errors.extend(channel.validate());
            if !names.insert(channel.name.as_str()) {
                errors.push(format!("Duplicate channel name: '{}'", channel.name));
            }
        }

        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result, ignoring warnings
    pub fn validate_strict(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|e| !e.starts_with("WARNING:"))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Worker pool and runtime sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Threads in the background work pool
    pub work_threads: usize,

    /// Threads in the callback dispatch pool
    pub dispatch_threads: usize,

    /// Threads in the tokio runtime driving socket I/O
    pub io_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_threads: 4,
            dispatch_threads: 1,
            io_threads: 2,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.io_threads == 0 {
            errors.push("I/O threads must be greater than 0".to_string());
        }

        if self.work_threads > 1024 || self.dispatch_threads > 1024 {
            errors.push("Worker pool too large (maximum: 1024 threads)".to_string());
        }

        if self.work_threads == 0 {
            errors.push(
                "WARNING: work_threads is 0 - every job runs on its own thread".to_string(),
            );
        }

        if self.dispatch_threads != 1 {
            errors.push(
                "WARNING: dispatch_threads is not 1 - callbacks may be observed out of order"
                    .to_string(),
            );
        }

        errors
    }
}

/// Per-session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Initial receive buffer size in bytes; grows on demand
    pub receive_buffer_size: usize,

    /// Timeout for outbound connects
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Default wait for awaitable responses
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            response_timeout: timeout::RESPONSE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.receive_buffer_size < HEADER_SIZE {
            errors.push(format!(
                "Receive buffer too small: {} bytes (minimum: {HEADER_SIZE})",
                self.receive_buffer_size
            ));
        } else if self.receive_buffer_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Receive buffer too large: {} bytes (maximum: 64 MB)",
                self.receive_buffer_size
            ));
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.response_timeout.as_millis() < 10 {
            errors.push("Response timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// One listening (or client-only) session pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Unique channel name
    pub name: String,

    /// Key into the engine's session factory registry
    #[serde(default = "default_factory")]
    pub session_factory: String,

    /// Ceiling on pooled sessions, 0 for unbounded
    #[serde(default)]
    pub max_session_count: usize,

    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to listen on, 0 to create the channel without listening
    #[serde(default)]
    pub listen_port: u16,
}

fn default_factory() -> String {
    DEFAULT_SESSION_FACTORY.to_string()
}

fn default_listen_address() -> String {
    String::from("0.0.0.0")
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            session_factory: default_factory(),
            max_session_count: 0,
            listen_address: default_listen_address(),
            listen_port: 0,
        }
    }
}

impl ChannelConfig {
    /// `listen_address:listen_port`
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("Channel name cannot be empty".to_string());
        }

        if self.session_factory.is_empty() {
            errors.push(format!(
                "Channel '{}' has an empty session factory",
                self.name
            ));
        }

        if self.listen_port != 0
            && self.listen_address.parse::<std::net::IpAddr>().is_err()
        {
            errors.push(format!(
                "Invalid listen address for channel '{}': '{}' (expected an IP address)",
                self.name, self.listen_address
            ));
        }

        errors
    }
}

/// Output settings consumed by [`crate::utils::logging::init_logging`]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Recorded in the startup event
    pub app_name: String,

    /// Default filter level; `RUST_LOG` overrides it
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Required when `log_to_file` is set; opened in append mode
    pub log_file_path: Option<String>,

    /// One JSON object per event instead of the human-readable format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("sessionnet"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.app_name.len() {
            0 => errors.push("app_name must not be empty".to_string()),
            len if len > 64 => {
                errors.push(format!("app_name is {len} characters long (maximum: 64)"))
            }
            _ => {}
        }

        match (self.log_to_file, self.log_file_path.as_deref()) {
            (true, None) => errors.push(constants::ERR_LOG_FILE_REQUIRED.to_string()),
            (true, Some(path)) => {
                let dir = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty());
                if let Some(dir) = dir.filter(|d| !d.exists()) {
                    errors.push(format!("Log directory {} does not exist", dir.display()));
                }
            }
            (false, _) if !self.log_to_console => {
                errors.push("Logging needs console or file output enabled".to_string())
            }
            _ => {}
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_use_prefix() {
        let vars: HashMap<String, String> = [
            ("SESSIONNET_WORK_THREADS", "8"),
            ("SESSIONNET_CONNECT_TIMEOUT_MS", "250"),
            ("SESSIONNET_LOG_LEVEL", "debug"),
            ("SESSIONNET_IO_THREADS", "not-a-number"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = NetworkConfig::default();
        config.apply_env_overrides(|key| vars.get(key).cloned());

        assert_eq!(config.workers.work_threads, 8);
        assert_eq!(config.session.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.logging.log_level, Level::DEBUG);
        assert_eq!(config.workers.io_threads, 2);
    }

    #[test]
    fn example_config_parses_back() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.channels.len(), 1);
        assert_eq!(parsed.channels[0].listen_port, 10100);
        assert!(parsed.validate().is_empty());
    }
}
