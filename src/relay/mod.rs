//! Line Relay Module
//!
//! Ferries newline-delimited text in both directions over a connection.

pub mod reader;
pub mod session;
pub mod writer;

pub use reader::{LineRelay, DEFAULT_MAX_LINE_LENGTH};
pub use session::{ConnectionStats, RelaySession};
pub use writer::{prepare_line, write_line};
