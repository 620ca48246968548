//! Error Types
//!
//! Socket-layer failures are typed so the collaborator can tell them apart.
//! Configuration and start-up plumbing use `anyhow` via `crate::Result`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish a connection
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A connection is already open; the existing one is left untouched
    #[error("already connected to {remote}")]
    AlreadyConnected { remote: SocketAddr },

    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve {target}: resolution timed out after {timeout:?}")]
    ResolveTimedOut { target: String, timeout: Duration },

    #[error("no addresses resolved for {target}")]
    NoAddresses { target: String },

    #[error("connection to {addr} refused")]
    Refused { addr: SocketAddr },

    #[error("connection to {addr} timed out after {timeout:?}")]
    TimedOut { addr: SocketAddr, timeout: Duration },

    #[error("connection to {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectError {
    /// Build the error for a failed TCP connect to `addr`
    pub(crate) fn from_io(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::ConnectionRefused {
            ConnectError::Refused { addr }
        } else {
            ConnectError::Io { addr, source }
        }
    }
}

/// Failure to write an outbound line
#[derive(Debug, Error)]
pub enum WriteError {
    /// No connection has been opened
    #[error("not connected")]
    NotConnected,

    /// The connection was torn down before or during the write
    #[error("connection is closed")]
    Closed,

    #[error("line contains an embedded line break")]
    InvalidLine,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a read loop ended. Delivered exactly once per loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end of the stream
    PeerClosed,
    /// Reading from the socket failed
    ReadError(String),
    /// The loop was stopped by an explicit disconnect
    LocalShutdown,
}

impl CloseReason {
    /// Whether the close came from the remote side or the network
    pub fn is_remote(&self) -> bool {
        !matches!(self, CloseReason::LocalShutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "server closed the connection"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::LocalShutdown => write!(f, "disconnected locally"),
        }
    }
}
