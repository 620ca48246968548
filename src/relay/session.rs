//! Relay Session Statistics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Line and byte counters for one connection
#[derive(Debug)]
pub struct RelaySession {
    pub connection_id: String,
    pub remote_addr: SocketAddr,
    pub start_time: Instant,
    lines_sent: AtomicU64,
    lines_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Snapshot of a connection's statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub connection_id: String,
    pub remote_addr: SocketAddr,
    pub start_time: std::time::SystemTime,
    pub duration_ms: u64,
    pub lines_sent: u64,
    pub lines_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl RelaySession {
    pub fn new(connection_id: String, remote_addr: SocketAddr) -> Self {
        Self {
            connection_id,
            remote_addr,
            start_time: Instant::now(),
            lines_sent: AtomicU64::new(0),
            lines_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Count one outbound line of `bytes` bytes, terminator included
    pub fn record_sent(&self, bytes: u64) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one inbound record of `bytes` bytes as read off the wire
    pub fn record_received(&self, bytes: u64) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn lines_sent(&self) -> u64 {
        self.lines_sent.load(Ordering::Relaxed)
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn to_stats(&self) -> ConnectionStats {
        let duration = self.duration();

        ConnectionStats {
            connection_id: self.connection_id.clone(),
            remote_addr: self.remote_addr,
            start_time: std::time::SystemTime::now() - duration,
            duration_ms: duration.as_millis() as u64,
            lines_sent: self.lines_sent(),
            lines_received: self.lines_received(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Log the session summary at teardown
    pub fn log_stats(&self) {
        let stats = self.to_stats();

        info!(
            connection_id = %stats.connection_id,
            remote_addr = %stats.remote_addr,
            duration_ms = stats.duration_ms,
            lines_sent = stats.lines_sent,
            lines_received = stats.lines_received,
            bytes_sent = stats.bytes_sent,
            bytes_received = stats.bytes_received,
            "Connection closed"
        );
    }
}
