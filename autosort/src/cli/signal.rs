//! Ctrl-C and SIGTERM handling for the long-running commands

use anyhow::Result;
use tracing::info;

/// Termination signals, registered as soon as this is created so a signal
/// that arrives before anything awaits it still counts
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Must be called from within a tokio runtime
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use anyhow::Context;
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?,
            terminate: signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Resolves on the first termination signal
    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT, shutting down gracefully"),
            _ = self.terminate.recv() => info!("Received SIGTERM, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down gracefully"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
