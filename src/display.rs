//! Display Queue
//!
//! Everything the core wants shown (inbound lines and status events) goes
//! through one unbounded channel. The receiver is the single consumption
//! point, so deliveries from the read loop and from caller-driven operations
//! never interleave out of order on the display.

use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::CloseReason;

/// Connection status changes reported to the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connected { remote_addr: SocketAddr },
    Disconnected,
    LostConnection { reason: CloseReason },
    SocketCloseError { error: String },
}

/// A single item for the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// An inbound line with its terminator stripped
    Line(String),
    Status(StatusEvent),
    /// A message from the front-end itself, such as a failed send
    Notice(String),
}

/// Create the display queue
pub fn channel() -> (DisplayHandle, DisplayReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DisplayHandle { tx }, DisplayReceiver { rx })
}

/// Producer side, cloned into every component that reports to the display
#[derive(Debug, Clone)]
pub struct DisplayHandle {
    tx: mpsc::UnboundedSender<DisplayEvent>,
}

impl DisplayHandle {
    pub fn line(&self, text: String) {
        self.publish(DisplayEvent::Line(text));
    }

    pub fn status(&self, event: StatusEvent) {
        self.publish(DisplayEvent::Status(event));
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.publish(DisplayEvent::Notice(text.into()));
    }

    fn publish(&self, event: DisplayEvent) {
        // The display may already be gone during process exit
        if self.tx.send(event).is_err() {
            debug!("Display receiver dropped, discarding event");
        }
    }
}

/// Consumer side of the display queue
#[derive(Debug)]
pub struct DisplayReceiver {
    rx: mpsc::UnboundedReceiver<DisplayEvent>,
}

impl DisplayReceiver {
    /// Wait for the next event. Returns `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<DisplayEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<DisplayEvent> {
        self.rx.try_recv().ok()
    }
}
