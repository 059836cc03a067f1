//! Run a relay engine on its own thread.
//!
//! The engine is synchronous and owns its thread for its whole lifetime;
//! the handle is how async code (the binary, integration tests) starts it,
//! stops it and reads its counters.

use anyhow::{anyhow, Context};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::stats::{RelayStats, StatsSnapshot};
use super::RelayEngine;
use crate::config::RelayConfig;
use crate::Result;

/// Handle to a running relay engine.
///
/// When dropped, the engine is stopped and its thread joined, so the listen
/// address is free again once the drop returns.
pub struct RelayHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    stats: Arc<RelayStats>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl RelayHandle {
    /// Bind and start a relay with its own stop token.
    pub fn spawn(config: &RelayConfig) -> Result<Self> {
        Self::spawn_with_shutdown(config, CancellationToken::new())
    }

    /// Bind and start a relay that stops when `shutdown` is cancelled.
    ///
    /// Binding happens on the calling thread, so a bind failure is returned
    /// here rather than from the engine thread. If the engine later exits on
    /// its own, it cancels `shutdown` so the owner notices.
    pub fn spawn_with_shutdown(config: &RelayConfig, shutdown: CancellationToken) -> Result<Self> {
        let engine = RelayEngine::bind(config)?;
        let addr = engine.local_addr();
        let stats = engine.stats();

        let thread = std::thread::Builder::new()
            .name("relay-engine".to_string())
            .spawn({
                let shutdown = shutdown.clone();
                move || {
                    let result = engine.run(&shutdown);
                    if let Err(e) = &result {
                        error!("Relay engine failed: {:#}", e);
                    }
                    shutdown.cancel();
                    result
                }
            })
            .context("Failed to spawn relay engine thread")?;

        info!(listen_addr = %addr, "Relay engine started");

        Ok(Self {
            addr,
            shutdown,
            stats,
            thread: Some(thread),
        })
    }

    /// The address the relay is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Request the engine to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop the engine, wait for its thread to finish and return the final
    /// counters.
    pub fn join(mut self) -> Result<StatsSnapshot> {
        self.stop_and_join()?;
        Ok(self.stats.snapshot())
    }

    fn stop_and_join(&mut self) -> Result<()> {
        self.shutdown.cancel();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow!("Relay engine thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_and_join() {
            error!("Relay engine did not stop cleanly: {:#}", e);
        }
    }
}
