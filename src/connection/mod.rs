//! Connection Management Module
//!
//! Establishes, tracks, and tears down the single connection to the server.

pub mod manager;
pub mod types;

pub use manager::ConnectionManager;
pub use types::{CloseGuard, Connection};
