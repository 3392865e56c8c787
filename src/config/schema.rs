//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for a pooled client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend members of the fleet. Must not be empty.
    pub servers: Vec<ServerAddress>,

    /// Declare the pool ready as soon as one member connects.
    pub ready_with_one: bool,

    /// Optional TLS settings. Connections are plaintext when absent.
    pub tls: Option<TlsConfig>,

    /// Reconnection behaviour.
    pub reconnect: ReconnectConfig,

    /// Response validation rules.
    pub response: ResponseConfig,

    /// Wire-level limits.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ClientConfig {
    /// Configuration for `servers` with every other setting at its default.
    pub fn with_servers(servers: Vec<ServerAddress>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }
}

/// Host and port of one backend member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected HOST:PORT, got '{}'", s))?;
        if host.is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{}': {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

/// TLS configuration for backend connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the CA bundle (PEM) used to verify members.
    pub ca_path: String,

    /// Name to verify in member certificates. Defaults to each member's host.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Delay strategy between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Exponential,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before retrying a member, in milliseconds.
    pub base_delay_ms: u64,

    /// Cap for exponential backoff, in milliseconds.
    pub max_delay_ms: u64,

    /// Constant or exponential backoff.
    pub backoff: BackoffKind,

    /// Bring-up attempts per member before it is given up on.
    /// Only honoured when every member is required; `None` retries forever.
    pub max_connect_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff: BackoffKind::Constant,
            max_connect_attempts: None,
        }
    }
}

/// Response validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Statuses at or above this value are application errors.
    pub error_status_threshold: u16,

    /// Require successful bodies to decode as JSON.
    pub decode_body: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            error_status_threshold: 400,
            decode_body: true,
        }
    }
}

/// Wire-level limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest frame accepted from or sent to a member, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
