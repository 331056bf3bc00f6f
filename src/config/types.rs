//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::listen::ListenConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// WebSocket listener.
    pub listen: ListenConfig,
    /// Token validation.
    pub auth: AuthConfig,
    /// Conversation store. Absent means typing/read routing runs against
    /// the no-op provider.
    pub database: Option<DatabaseConfig>,
    /// Keep-alive and idle-detection timing.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Hub sizing.
    #[serde(default)]
    pub hub: HubConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name (e.g., "hub.agora.example.org").
    pub name: String,
    /// Prometheus metrics HTTP port (default: 9090, 0 disables).
    pub metrics_port: Option<u16>,
}

/// Token validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with the platform's token issuer.
    pub secret: String,
}

impl AuthConfig {
    /// True when the secret is a placeholder that must not reach
    /// production: tokens signed with a guessable secret can be forged
    /// for any user id and role.
    pub fn is_insecure_secret(&self) -> bool {
        self.secret.len() < 32 || self.secret == "change-me-to-a-random-32-char-string"
    }
}

/// Conversation store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the platform's SQLite database file.
    pub path: String,
}

/// Keep-alive timing for WebSocket connections.
///
/// The write loop sends a Ping every `ping` seconds; the read loop treats
/// `idle` seconds without any inbound frame (Pong included) as a dead peer
/// and disconnects. `idle` should cover several ping intervals.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between server Pings (default: 30).
    #[serde(default = "default_ping_interval")]
    pub ping: u64,

    /// Seconds of inbound silence before disconnect (default: 90).
    #[serde(default = "default_idle_timeout")]
    pub idle: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping: default_ping_interval(),
            idle: default_idle_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    90
}

/// Hub sizing configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HubConfig {
    /// Per-connection outbound queue capacity (default: 32). A full queue
    /// drops events for that recipient instead of blocking the sender.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_default_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping, 30);
        assert_eq!(config.idle, 90);
    }

    #[test]
    fn hub_default_queue_capacity_is_32() {
        assert_eq!(HubConfig::default().queue_capacity, 32);
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "hub.agora.test"
            metrics_port = 0

            [listen]
            address = "127.0.0.1:8085"

            [auth]
            secret = "0123456789abcdef0123456789abcdef"

            [database]
            path = "agora.db"

            [heartbeat]
            ping = 15
            idle = 45

            [hub]
            queue_capacity = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.server.name, "hub.agora.test");
        assert_eq!(config.heartbeat.ping, 15);
        assert_eq!(config.hub.queue_capacity, 64);
        assert!(!config.auth.is_insecure_secret());
    }

    #[test]
    fn optional_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "hub.agora.test"

            [listen]
            address = "127.0.0.1:8085"

            [auth]
            secret = "short"
            "#,
        )
        .unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.heartbeat.idle, 90);
        assert!(config.auth.is_insecure_secret());
    }
}
