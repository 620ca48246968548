//! Connection Types

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::debug;

use crate::error::WriteError;
use crate::relay::{write_line, ConnectionStats, RelaySession};

/// Single-use guard deciding which path releases a connection
#[derive(Debug, Default)]
pub struct CloseGuard {
    closed: AtomicBool,
}

impl CloseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A live connection to the server.
///
/// The input half is owned by the read loop; the output half lives here so
/// `send` calls are serialized and each completes before the next starts.
/// Closing cancels a send that is still blocked on the socket.
#[derive(Debug)]
pub struct Connection {
    id: String,
    remote_addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    close_guard: CloseGuard,
    shutdown_tx: broadcast::Sender<()>,
    closed_tx: watch::Sender<bool>,
    session: Arc<RelaySession>,
}

impl Connection {
    /// Wrap the output half of a freshly connected stream. The returned
    /// receiver stops the read loop when the connection is closed.
    pub(crate) fn new(
        id: String,
        remote_addr: SocketAddr,
        writer: OwnedWriteHalf,
    ) -> (Self, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (closed_tx, _) = watch::channel(false);
        let session = Arc::new(RelaySession::new(id.clone(), remote_addr));

        let connection = Self {
            id,
            remote_addr,
            writer: Mutex::new(Some(writer)),
            close_guard: CloseGuard::new(),
            shutdown_tx,
            closed_tx,
            session,
        };

        (connection, shutdown_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_addr.port()
    }

    pub fn is_open(&self) -> bool {
        !self.close_guard.is_closed()
    }

    pub fn session(&self) -> Arc<RelaySession> {
        Arc::clone(&self.session)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.session.to_stats()
    }

    /// Write `text` plus a newline and flush before returning.
    ///
    /// Fails with `WriteError::Closed` if the connection is closed before
    /// the write completes.
    pub async fn send(&self, text: &str) -> Result<(), WriteError> {
        if !self.is_open() {
            return Err(WriteError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(WriteError::Closed)?;

        let written = tokio::select! {
            biased;

            _ = self.wait_closed() => {
                debug!(connection_id = %self.id, "Send cancelled by close");
                return Err(WriteError::Closed);
            }
            result = write_line(writer, text) => result?,
        };
        self.session.record_sent(written as u64);
        debug!(connection_id = %self.id, bytes = written, "Sent line");

        Ok(())
    }

    async fn wait_closed(&self) {
        let mut closed = self.closed_tx.subscribe();
        // Only fails once the sender is dropped, which means `self` is gone
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Release the socket.
    ///
    /// Returns `None` when another path already closed this connection,
    /// otherwise the outcome of shutting down the output half. Lines that
    /// were fully written stay ahead of the shutdown; a send still blocked
    /// on the socket is cancelled.
    pub(crate) async fn close(&self) -> Option<std::io::Result<()>> {
        if !self.close_guard.try_close() {
            return None;
        }

        self.closed_tx.send_replace(true);
        if self.shutdown_tx.send(()).is_err() {
            debug!(connection_id = %self.id, "Read loop already stopped");
        }

        let writer = self.writer.lock().await.take();
        let result = match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        };

        self.session.log_stats();
        Some(result)
    }
}
