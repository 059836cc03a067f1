//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Address the listening socket binds to
    pub listen_addr: SocketAddr,
    /// Upstream target as `host:port`, resolved on every dial
    pub target_addr: String,
    /// Maximum bytes read from a socket in one read call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    /// Upper bound on a single multiplexer wait
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Per-address dial timeout; `None` blocks for the OS default
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub log_level: String,
}

fn default_chunk_size() -> usize {
    4096
}

fn default_listen_backlog() -> u32 {
    16
}

fn default_poll_timeout() -> Duration {
    Duration::from_millis(100)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            target_addr: "127.0.0.1:8081".to_string(),
            chunk_size: default_chunk_size(),
            listen_backlog: default_listen_backlog(),
            poll_timeout: default_poll_timeout(),
            connect_timeout: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
