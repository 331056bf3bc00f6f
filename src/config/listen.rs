//! Network listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:8085").
    pub address: SocketAddr,
    /// Allowed origins for the handshake Origin check
    /// (e.g., `["https://agora.example.org"]`). Empty list allows all.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Optional TLS termination for the listener (wss://).
    pub tls: Option<TlsConfig>,
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format).
    pub key_path: String,
}
