//! Connection Manager Implementation

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::Connection;
use crate::config::Config;
use crate::display::{DisplayHandle, StatusEvent};
use crate::error::{CloseReason, ConnectError, WriteError};
use crate::relay::{ConnectionStats, LineRelay};

/// The open connection and its read loop
struct ActiveConnection {
    connection: Arc<Connection>,
    reader: JoinHandle<()>,
}

/// Owns the single connection to the server and its lifecycle
pub struct ConnectionManager {
    config: Arc<Config>,
    display: DisplayHandle,
    active: Arc<Mutex<Option<ActiveConnection>>>,
    connect_gate: Mutex<()>,
    total_connections: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>, display: DisplayHandle) -> Self {
        Self {
            config,
            display,
            active: Arc::new(Mutex::new(None)),
            connect_gate: Mutex::new(()),
            total_connections: AtomicUsize::new(0),
        }
    }

    /// Connect to the configured endpoint
    pub async fn connect(&self) -> Result<Arc<Connection>, ConnectError> {
        let server = &self.config.server;
        self.connect_to(&server.host, server.port).await
    }

    /// Connect to `host:port` and start the read loop.
    ///
    /// Fails with `AlreadyConnected` while a connection is open, leaving it
    /// untouched.
    #[instrument(skip(self))]
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<Arc<Connection>, ConnectError> {
        let _gate = self.connect_gate.lock().await;

        {
            let mut active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                if current.connection.is_open() {
                    let remote = current.connection.remote_addr();
                    warn!("Connect rejected, already connected to {}", remote);
                    return Err(ConnectError::AlreadyConnected { remote });
                }
                debug!("Discarding closed connection {}", current.connection.id());
                *active = None;
            }
        }

        let (stream, remote_addr) = self.establish(host, port).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on connection to {}: {}", remote_addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let id = Uuid::new_v4().to_string();
        let (connection, shutdown_rx) = Connection::new(id, remote_addr, write_half);
        let connection = Arc::new(connection);

        // Held until the slot is filled so `send` and the read loop's close
        // path observe the connection as soon as `Connected` is published
        let mut active = self.active.lock().await;

        self.total_connections.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = %connection.id(), "Connected to {}", remote_addr);
        self.display.status(StatusEvent::Connected { remote_addr });

        let reader = self.start_relay(&connection, read_half, shutdown_rx);
        *active = Some(ActiveConnection {
            connection: Arc::clone(&connection),
            reader,
        });

        Ok(connection)
    }

    /// Close the open connection, if any. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let entry = self.active.lock().await.take();
        let Some(ActiveConnection { connection, reader }) = entry else {
            debug!("Disconnect requested with no open connection");
            return;
        };

        match connection.close().await {
            Some(result) => {
                info!(connection_id = %connection.id(), "Disconnected from {}", connection.remote_addr());
                self.display.status(StatusEvent::Disconnected);
                if let Err(e) = result {
                    warn!(connection_id = %connection.id(), "Error closing socket: {}", e);
                    self.display.status(StatusEvent::SocketCloseError { error: e.to_string() });
                }
            }
            None => {
                debug!(connection_id = %connection.id(), "Connection already closed");
            }
        }

        if let Err(e) = reader.await {
            if !e.is_cancelled() {
                error!("Read loop task failed: {}", e);
            }
        }
    }

    /// Send one line over the open connection
    pub async fn send(&self, text: &str) -> Result<(), WriteError> {
        match self.current().await {
            Some(connection) => connection.send(text).await,
            None => Err(WriteError::NotConnected),
        }
    }

    /// The open connection, if any
    pub async fn current(&self) -> Option<Arc<Connection>> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|a| a.connection.is_open())
            .map(|a| Arc::clone(&a.connection))
    }

    pub async fn is_connected(&self) -> bool {
        self.current().await.is_some()
    }

    /// Statistics for the open connection
    pub async fn stats(&self) -> Option<ConnectionStats> {
        self.current().await.map(|c| c.stats())
    }

    /// Number of connections established since start-up
    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn start_relay(
        &self,
        connection: &Arc<Connection>,
        read_half: OwnedReadHalf,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let line_display = self.display.clone();
        let on_line = move |line: String| line_display.line(line);

        let display = self.display.clone();
        let active = Arc::clone(&self.active);
        let closing = Arc::clone(connection);
        let on_closed = move |reason: CloseReason| async move {
            if !reason.is_remote() {
                return;
            }

            if let Some(result) = closing.close().await {
                warn!(connection_id = %closing.id(), "Lost connection to {}: {}", closing.remote_addr(), reason);
                display.status(StatusEvent::LostConnection { reason });
                if let Err(e) = result {
                    warn!(connection_id = %closing.id(), "Error closing socket: {}", e);
                    display.status(StatusEvent::SocketCloseError { error: e.to_string() });
                }
            }

            let mut active = active.lock().await;
            if active.as_ref().is_some_and(|a| a.connection.id() == closing.id()) {
                *active = None;
            }
        };

        LineRelay::new(self.config.client.read_buffer_size)
            .with_max_line_length(self.config.client.max_line_length)
            .with_session(connection.session())
            .start_reading(read_half, shutdown_rx, on_line, on_closed)
    }

    /// Resolve `host` and try each address in turn
    async fn establish(&self, host: &str, port: u16) -> Result<(TcpStream, SocketAddr), ConnectError> {
        let addrs = self.resolve(host, port).await?;

        let mut last_error = None;
        for addr in addrs {
            match self.try_connect(addr).await {
                Ok(stream) => return Ok((stream, addr)),
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectError::NoAddresses {
            target: format!("{}:{}", host, port),
        }))
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ConnectError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let target = format!("{}:{}", host, port);
        let connect_timeout = self.config.server.connect_timeout;
        debug!("Resolving {}", target);

        match timeout(connect_timeout, lookup_host((host, port))).await {
            Ok(Ok(addrs)) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    return Err(ConnectError::NoAddresses { target });
                }
                debug!("Resolved {} to {} addresses", target, addrs.len());
                Ok(addrs)
            }
            Ok(Err(source)) => Err(ConnectError::Resolve { target, source }),
            Err(_) => Err(ConnectError::ResolveTimedOut { target, timeout: connect_timeout }),
        }
    }

    async fn try_connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError> {
        let connect_timeout = self.config.server.connect_timeout;
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConnectError::from_io(addr, e)),
            Err(_) => Err(ConnectError::TimedOut { addr, timeout: connect_timeout }),
        }
    }
}
