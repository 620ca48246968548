//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT and makes sure an open connection is
//! closed cleanly before the process exits.

use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::signal;
use tracing::{info, warn};
use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Upper bound on closing the connection
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal without waiting for an OS signal
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("No components listening for shutdown signal");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown
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
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Disconnect the open connection, giving up after the timeout
    pub async fn shutdown_connection_manager(&self, connection_manager: &ConnectionManager) -> Result<()> {
        info!("Closing connection before exit (timeout: {:?})", self.timeout);
        let start_time = Instant::now();

        match tokio::time::timeout(self.timeout, connection_manager.disconnect()).await {
            Ok(()) => {
                info!("Connection closed in {:?}", start_time.elapsed());
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout reached after {:?}", start_time.elapsed());
                Err(anyhow::anyhow!("Timed out closing connection after {:?}", self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::display;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.trigger();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_without_listeners() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));

        // Should not panic
        coordinator.trigger();
    }

    #[tokio::test]
    async fn test_shutdown_with_no_connection() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let (handle, _receiver) = display::channel();
        let manager = ConnectionManager::new(Arc::new(Config::default()), handle);

        assert!(coordinator.shutdown_connection_manager(&manager).await.is_ok());
    }
}
