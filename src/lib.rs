//! ParkClient Library
//!
//! Core of a line-based TCP client for the parking reservation server.
//! A `ConnectionManager` owns at most one connection, a per-connection
//! read loop relays inbound lines, and everything meant for the user flows
//! through a single display queue.

pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod relay;
pub mod shutdown;
pub mod terminal;

pub use config::Config;
pub use connection::{Connection, ConnectionManager};
pub use display::{DisplayEvent, DisplayHandle, DisplayReceiver, StatusEvent};
pub use error::{CloseReason, ConnectError, WriteError};
pub use shutdown::ShutdownCoordinator;

/// Common error type for start-up and configuration plumbing
pub type Result<T> = anyhow::Result<T>;
