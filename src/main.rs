//! tcprelay - Transparent TCP Relay
//!
//! Listens on one address and forwards every connection to a fixed target.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcprelay::config::{Config, ConfigManager, ConfigOverrides};
use tcprelay::{RelayHandle, ShutdownCoordinator};

/// CLI arguments for tcprelay
#[derive(Parser, Debug)]
#[command(name = "tcprelay")]
#[command(about = "tcprelay - Transparent TCP relay")]
#[command(version)]
#[command(long_about = "
tcprelay - Transparent TCP relay

Accepts connections on LISTEN and relays each one, byte for byte, to TARGET.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RELAY_LISTEN_ADDR      - Listen address (e.g., 127.0.0.1:8080)
  RELAY_TARGET_ADDR      - Target host:port (e.g., 127.0.0.1:8081)
  RELAY_CHUNK_SIZE       - Bytes read per read call
  RELAY_POLL_TIMEOUT     - Readiness poll timeout (e.g., 100ms)
  RELAY_CONNECT_TIMEOUT  - Target connect timeout (e.g., 5s)
  RELAY_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Listen address (overrides config file)
    #[arg(help = "Listen address (e.g., 127.0.0.1:8080)")]
    pub listen: Option<SocketAddr>,

    /// Target address (overrides config file)
    #[arg(help = "Target host:port (e.g., 127.0.0.1:8081)")]
    pub target: Option<String>,

    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tcprelay.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bytes read per read call
    #[arg(long, help = "Bytes read from a socket per read call")]
    pub chunk_size: Option<usize>,

    /// Readiness poll timeout
    #[arg(
        long,
        value_parser = humantime::parse_duration,
        help = "Readiness poll timeout (e.g., 100ms)"
    )]
    pub poll_timeout: Option<Duration>,

    /// Target connect timeout
    #[arg(
        long,
        value_parser = humantime::parse_duration,
        help = "Target connect timeout (e.g., 5s)"
    )]
    pub connect_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

impl CliArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen_addr: self.listen,
            target_addr: self.target.clone(),
            chunk_size: self.chunk_size,
            poll_timeout: self.poll_timeout,
            connect_timeout: self.connect_timeout,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };
    config.merge_with_cli_args(&args.overrides());

    init_tracing(&args, &config)?;

    info!("Starting tcprelay v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Listen address: {}", config.relay.listen_addr);
        info!("  Target address: {}", config.relay.target_addr);
        info!("  Chunk size: {} bytes", config.relay.chunk_size);
        info!("  Listen backlog: {}", config.relay.listen_backlog);
        info!("  Poll timeout: {:?}", config.relay.poll_timeout);
        info!(
            "  Connect timeout: {}",
            config
                .relay
                .connect_timeout
                .map(|t| format!("{:?}", t))
                .unwrap_or_else(|| "system default".to_string())
        );
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new();
    let relay = RelayHandle::spawn_with_shutdown(&config.relay, shutdown_coordinator.token())
        .context("Failed to start relay")?;

    info!(
        "tcprelay relaying {} -> {}",
        relay.local_addr(),
        config.relay.target_addr
    );
    info!("Press Ctrl+C or send SIGTERM/SIGINT to stop");

    let engine_stopped = shutdown_coordinator.token();
    tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            result.context("Error setting up signal handlers")?;
        }
        _ = engine_stopped.cancelled() => {
            warn!("Relay engine stopped without a shutdown request");
        }
    }

    info!("Stopping relay...");
    let stats = tokio::task::spawn_blocking(move || relay.join())
        .await
        .context("Relay join task failed")??;

    info!(
        total_pairs = stats.total_pairs,
        dial_failures = stats.dial_failures,
        bytes_up = stats.bytes_up,
        bytes_down = stats.bytes_down,
        "Relay shutdown complete"
    );

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
