//! Client configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) yields a usable configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::*;
use crate::error::{Error, Result};

/// What the control channel does with a command other than HEARTBEAT once
/// streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnexpectedCommandPolicy {
    /// Abort the session with a protocol violation
    Fail,
    /// Log and keep streaming
    Ignore,
}

impl Default for UnexpectedCommandPolicy {
    fn default() -> Self {
        UnexpectedCommandPolicy::Fail
    }
}

/// Control/data channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Bound on each handshake reply
    pub handshake_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Send HEARTBEAT every interval instead of echoing the server's
    pub heartbeat_ping: bool,
    pub unexpected_command: UnexpectedCommandPolicy,
    /// SO_RCVBUF hint for the UDP socket
    pub receive_buffer_bytes: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            heartbeat_ping: false,
            unexpected_command: UnexpectedCommandPolicy::default(),
            receive_buffer_bytes: Some(DEFAULT_RECEIVE_BUFFER_BYTES),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        validate_target(&self.host, self.port)?;
        self.validate_timings()
    }

    /// Timeouts and intervals must be non-zero
    pub fn validate_timings(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Buffering hints for the audio sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Ring buffer capacity in datagrams
    pub buffer_chunks: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: RING_BUFFER_CAPACITY,
        }
    }
}

/// Caller-side reconnect behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub sink: SinkConfig,
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.network.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}

/// `<config dir>/audio-share-client/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "audio-share-client").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Check a (host, port) pair before any socket is touched
pub fn validate_target(host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::Config("host must not be empty".to_string()));
    }
    if port == 0 {
        return Err(Error::Config("port must be in 1-65535".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.network.heartbeat_interval(), Duration::from_secs(3));
        assert_eq!(config.network.heartbeat_timeout(), Duration::from_secs(5));
        assert_eq!(config.network.unexpected_command, UnexpectedCommandPolicy::Fail);
        assert_eq!(config.retry.delay(), Duration::from_secs(3));
        assert!(config.network.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = ClientConfig::from_toml(
            r#"
            [network]
            host = "10.0.0.5"
            port = 7000
            unexpected_command = "ignore"

            [sink]
            buffer_chunks = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.network.host, "10.0.0.5");
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.unexpected_command, UnexpectedCommandPolicy::Ignore);
        assert_eq!(config.network.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.sink.buffer_chunks, 64);
        assert!(config.retry.enabled);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ClientConfig::from_toml("[network]\nport = 0\n").is_err());
        assert!(ClientConfig::from_toml("[network]\nhost = \"  \"\n").is_err());
        assert!(ClientConfig::from_toml("[network]\nheartbeat_timeout_ms = 0\n").is_err());
        assert!(ClientConfig::from_toml("[network]\nport = 70000\n").is_err());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let mut config = ClientConfig::default();
        config.network.heartbeat_ping = true;
        config.retry.enabled = false;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("localhost", 1).is_ok());
        assert!(validate_target("", 65530).is_err());
        assert!(validate_target("localhost", 0).is_err());
    }
}
