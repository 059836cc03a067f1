//! Graceful Shutdown Handling
//!
//! Turns SIGTERM/SIGINT into a cancelled token. The relay engine checks the
//! token once per loop iteration, so it stops within one poll timeout.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;

/// Shutdown coordinator that owns the process-wide stop token
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to components that must stop on shutdown
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown without waiting for a signal
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGTERM/SIGINT (Ctrl+C elsewhere), then cancel the token.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }
}
