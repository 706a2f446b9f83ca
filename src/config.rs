//! # Configuration Management
//!
//! Centralized configuration for the chat server and its clients.
//!
//! ## Configuration Sources
//! - TOML files via [`NetworkConfig::from_file`]
//! - Environment variables (`CHAT_PROTOCOL_*`) via [`NetworkConfig::from_env`]
//! - Direct instantiation with defaults
//!
//! Durations are written as milliseconds.
//!
//! ```
//! use chat_protocol::config::NetworkConfig;
//!
//! let config = NetworkConfig::from_toml(
//!     r#"
//!     [transport]
//!     datagram_budget = 512
//!     pad_byte = 35
//!     max_message_size = 1048576
//!     reassembly_ttl = 5000
//!     reassembly_order = "sequence"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.transport.datagram_budget, 512);
//! assert!(config.validate().is_empty());
//! ```

use crate::core::fragment::ReassemblyOrder;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest single message accepted on either transport (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Size of every datagram frame, padding included
pub const DEFAULT_DATAGRAM_BUDGET: usize = 777;

/// Filler written after a frame's content
pub const PAD_BYTE: u8 = b'#';

/// Unfinished reassemblies older than this are dropped
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(30);

/// Registered datagram peers silent this long are torn down
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables over the defaults.
    ///
    /// Unparseable values are rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CHAT_PROTOCOL_STREAM_ADDRESS") {
            config.server.stream_address = addr;
        }

        if let Ok(addr) = std::env::var("CHAT_PROTOCOL_DATAGRAM_ADDRESS") {
            config.server.datagram_address = addr;
        }

        if let Some(val) = env_parse::<usize>("CHAT_PROTOCOL_BACKPRESSURE_LIMIT")? {
            config.server.backpressure_limit = val;
        }

        if let Some(val) = env_parse::<usize>("CHAT_PROTOCOL_MAX_CONNECTIONS")? {
            config.server.max_connections = val;
        }

        if let Some(val) = env_parse::<u64>("CHAT_PROTOCOL_IDLE_TIMEOUT_MS")? {
            config.server.idle_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("CHAT_PROTOCOL_CONNECTION_TIMEOUT_MS")? {
            config.client.connection_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<usize>("CHAT_PROTOCOL_DATAGRAM_BUDGET")? {
            config.transport.datagram_budget = val;
        }

        if let Some(val) = env_parse::<u64>("CHAT_PROTOCOL_REASSEMBLY_TTL_MS")? {
            config.transport.reassembly_ttl = Duration::from_millis(val);
        }

        if let Ok(order) = std::env::var("CHAT_PROTOCOL_REASSEMBLY_ORDER") {
            config.transport.reassembly_order = match order.to_ascii_lowercase().as_str() {
                "arrival" => ReassemblyOrder::Arrival,
                "sequence" => ReassemblyOrder::Sequence,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid reassembly order: '{other}' (expected 'arrival' or 'sequence')"
                    )))
                }
            };
        }

        if let Ok(level) = std::env::var("CHAT_PROTOCOL_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: '{level}'"))
            })?;
        }

        Ok(config)
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
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
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

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn validate_address(label: &str, address: &str, errors: &mut Vec<String>) {
    if address.is_empty() {
        errors.push(format!("{label} cannot be empty"));
    } else if address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {label} format: '{address}' (expected format: '0.0.0.0:8080')"
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Stream (TCP) listen address
    pub stream_address: String,

    /// Datagram (UDP) listen address
    pub datagram_address: String,

    /// Capacity of each peer's outbound queue
    pub backpressure_limit: usize,

    /// Datagram peers silent this long are disconnected
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent stream connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stream_address: String::from("127.0.0.1:7777"),
            datagram_address: String::from("127.0.0.1:7778"),
            backpressure_limit: 64,
            idle_timeout: IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("stream address", &self.stream_address, &mut errors);
        validate_address("datagram address", &self.datagram_address, &mut errors);

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.idle_timeout.as_secs() < 1 {
            errors.push("Idle timeout too short (minimum: 1s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for waiting for a server message
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Exact size of each datagram frame
    pub datagram_budget: usize,

    /// Filler byte padding each datagram frame
    pub pad_byte: u8,

    /// Maximum encoded message (or reassembled body) size in bytes
    pub max_message_size: usize,

    /// Lifetime of an idle reassembly entry
    #[serde(with = "duration_serde")]
    pub reassembly_ttl: Duration,

    /// How fragments are ordered on completion
    pub reassembly_order: ReassemblyOrder,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            datagram_budget: DEFAULT_DATAGRAM_BUDGET,
            pad_byte: PAD_BYTE,
            max_message_size: MAX_MESSAGE_SIZE,
            reassembly_ttl: REASSEMBLY_TTL,
            reassembly_order: ReassemblyOrder::Arrival,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Room for marker, tag, a short identity header and a chunk
        if self.datagram_budget < 64 {
            errors.push("Datagram budget too small (minimum: 64 bytes)".to_string());
        } else if self.datagram_budget > 65_507 {
            errors.push(format!(
                "Datagram budget too large: {} bytes (maximum UDP payload: 65507)",
                self.datagram_budget
            ));
        }

        if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_message_size
            ));
        }

        if self.reassembly_ttl.as_millis() < 100 {
            errors.push("Reassembly TTL too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("chat-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetworkConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.transport.datagram_budget, 777);
        assert_eq!(config.transport.pad_byte, b'#');
        assert_eq!(config.transport.reassembly_order, ReassemblyOrder::Arrival);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = NetworkConfig::from_toml(
            r#"
            [server]
            stream_address = "0.0.0.0:9100"
            idle_timeout = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.server.stream_address, "0.0.0.0:9100");
        assert_eq!(config.server.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.server.datagram_address, "127.0.0.1:7778");
        assert_eq!(config.transport.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_example_config_roundtrips() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.transport.datagram_budget, DEFAULT_DATAGRAM_BUDGET);
        assert_eq!(parsed.logging.log_level, Level::INFO);
    }
}
