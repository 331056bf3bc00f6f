//! Configuration loading and management.
//!
//! Split into logical submodules:
//! - [`types`]: Core config structs (Config, ServerConfig, AuthConfig,
//!   DatabaseConfig, HeartbeatConfig, HubConfig) and loading
//! - [`listen`]: Network listener configuration (ListenConfig, TlsConfig)

mod listen;
mod types;

pub use listen::{ListenConfig, TlsConfig};
pub use types::{
    AuthConfig, Config, ConfigError, DatabaseConfig, HeartbeatConfig, HubConfig, ServerConfig,
};
