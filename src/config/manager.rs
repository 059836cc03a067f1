//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Largest accepted read chunk
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted listen backlog
const MAX_LISTEN_BACKLOG: u32 = 4096;

/// Longest accepted poll timeout; stop requests are only seen between polls
const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Values supplied on the command line, applied over every other source
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub listen_addr: Option<SocketAddr>,
    pub target_addr: Option<String>,
    pub chunk_size: Option<usize>,
    pub poll_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub log_level: Option<String>,
}

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults plus whatever `lookup` yields for
    /// the `RELAY_*` variables.
    pub fn load_from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(listen_addr) = lookup("RELAY_LISTEN_ADDR") {
            config.relay.listen_addr = listen_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid RELAY_LISTEN_ADDR: {}", listen_addr))?;
        }

        if let Some(target_addr) = lookup("RELAY_TARGET_ADDR") {
            config.relay.target_addr = target_addr;
        }

        if let Some(chunk_size) = lookup("RELAY_CHUNK_SIZE") {
            config.relay.chunk_size = chunk_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAY_CHUNK_SIZE: {}", chunk_size))?;
        }

        if let Some(timeout) = lookup("RELAY_POLL_TIMEOUT") {
            config.relay.poll_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RELAY_POLL_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = lookup("RELAY_CONNECT_TIMEOUT") {
            config.relay.connect_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid RELAY_CONNECT_TIMEOUT: {}", timeout))?,
            );
        }

        if let Some(log_level) = lookup("RELAY_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    /// Validate relay configuration
    fn validate_relay_config(&self) -> Result<()> {
        let relay = &self.relay;

        if relay.target_addr.trim().is_empty() {
            bail!("target_addr must not be empty");
        }

        match relay.target_addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                if port.parse::<u16>().is_err() {
                    bail!("target_addr has an invalid port: {}", relay.target_addr);
                }
            }
            _ => bail!("target_addr must be of the form host:port, got {}", relay.target_addr),
        }

        if relay.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        if relay.chunk_size > MAX_CHUNK_SIZE {
            bail!("chunk_size cannot exceed 1MB");
        }

        if relay.listen_backlog == 0 || relay.listen_backlog > MAX_LISTEN_BACKLOG {
            bail!("listen_backlog must be between 1 and {}", MAX_LISTEN_BACKLOG);
        }

        if relay.poll_timeout.is_zero() {
            bail!("poll_timeout must be greater than 0");
        }

        if relay.poll_timeout > MAX_POLL_TIMEOUT {
            bail!("poll_timeout cannot exceed {:?}", MAX_POLL_TIMEOUT);
        }

        if matches!(relay.connect_timeout, Some(timeout) if timeout.is_zero()) {
            bail!("connect_timeout must be greater than 0 when set");
        }

        Ok(())
    }

    /// Validate logging configuration
    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            bail!(
                "logging.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, overrides: &ConfigOverrides) {
        if let Some(addr) = overrides.listen_addr {
            self.relay.listen_addr = addr;
            tracing::info!("CLI override: listen address set to {}", addr);
        }

        if let Some(target) = &overrides.target_addr {
            self.relay.target_addr = target.clone();
            tracing::info!("CLI override: target address set to {}", target);
        }

        if let Some(chunk_size) = overrides.chunk_size {
            self.relay.chunk_size = chunk_size;
            tracing::info!("CLI override: chunk size set to {} bytes", chunk_size);
        }

        if let Some(timeout) = overrides.poll_timeout {
            self.relay.poll_timeout = timeout;
            tracing::info!("CLI override: poll timeout set to {:?}", timeout);
        }

        if let Some(timeout) = overrides.connect_timeout {
            self.relay.connect_timeout = Some(timeout);
            tracing::info!("CLI override: connect timeout set to {:?}", timeout);
        }

        if let Some(level) = &overrides.log_level {
            self.logging.log_level = level.clone();
        }
    }
}
