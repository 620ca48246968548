//! Terminal Front-End
//!
//! A line-oriented stand-in for a windowed client. Input lines are either
//! commands (`/connect`, `/disconnect`, ...) or text to send; display
//! events are rendered to an output stream by a single render loop.

use std::io::BufRead;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::display::{DisplayEvent, DisplayHandle, DisplayReceiver, StatusEvent};
use crate::relay::ConnectionStats;
use crate::Result;

const HELP: &str = "Commands:
  /connect      connect to the server
  /disconnect   close the connection
  /status       show connection state
  /quit         disconnect and exit
  /help         show this help
Any other line is sent to the server. Start a line with // to send a leading /.";

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    Status,
    Help,
    Quit,
    Send(String),
    Unknown(String),
}

impl Command {
    pub fn parse(input: &str) -> Command {
        let trimmed = input.trim();

        if let Some(escaped) = trimmed.strip_prefix("//") {
            return Command::Send(format!("/{}", escaped));
        }

        match trimmed {
            "/connect" => Command::Connect,
            "/disconnect" => Command::Disconnect,
            "/status" => Command::Status,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other if other.starts_with('/') => Command::Unknown(other.to_string()),
            other => Command::Send(other.to_string()),
        }
    }
}

/// Whether the input loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Drives the connection manager from user input
pub struct Terminal {
    manager: Arc<ConnectionManager>,
    display: DisplayHandle,
}

impl Terminal {
    pub fn new(manager: Arc<ConnectionManager>, display: DisplayHandle) -> Self {
        Self { manager, display }
    }

    pub async fn execute(&self, command: Command) -> Flow {
        match command {
            Command::Connect => {
                if let Err(e) = self.manager.connect().await {
                    self.display.notice(format!("Failed to connect to the server: {}", e));
                }
            }
            Command::Disconnect => {
                if self.manager.is_connected().await {
                    self.manager.disconnect().await;
                } else {
                    self.display.notice("Not connected.");
                }
            }
            Command::Status => match self.manager.stats().await {
                Some(stats) => self.display.notice(format_stats(&stats)),
                None => self.display.notice("Not connected."),
            },
            Command::Help => self.display.notice(HELP),
            Command::Quit => {
                self.manager.disconnect().await;
                return Flow::Quit;
            }
            Command::Send(text) => {
                if let Err(e) = self.manager.send(&text).await {
                    self.display.notice(format!("Failed to send: {}", e));
                }
            }
            Command::Unknown(command) => {
                self.display.notice(format!("Unknown command: {} (try /help)", command));
            }
        }

        Flow::Continue
    }

    /// Execute input lines until `/quit`, end of input, or shutdown
    pub async fn run(&self, mut input: mpsc::Receiver<String>, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Input loop received shutdown signal");
                    break;
                }
                line = input.recv() => {
                    let Some(line) = line else {
                        info!("End of input");
                        break;
                    };
                    if self.execute(Command::parse(&line)).await == Flow::Quit {
                        break;
                    }
                }
            }
        }
    }
}

/// Text shown for a display event
pub fn render(event: &DisplayEvent, server_prefix: &str) -> String {
    match event {
        DisplayEvent::Line(line) => format!("{}{}", server_prefix, line),
        DisplayEvent::Status(StatusEvent::Connected { .. }) => "Connected to server.".to_string(),
        DisplayEvent::Status(StatusEvent::Disconnected) => "Disconnected from server.".to_string(),
        DisplayEvent::Status(StatusEvent::LostConnection { reason }) => {
            format!("Lost connection to server ({}).", reason)
        }
        DisplayEvent::Status(StatusEvent::SocketCloseError { error }) => {
            format!("Error closing socket: {}", error)
        }
        DisplayEvent::Notice(text) => text.clone(),
    }
}

/// The single consumer of the display queue. Ends when every handle is dropped.
pub async fn render_loop<W>(mut receiver: DisplayReceiver, server_prefix: String, mut out: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = receiver.recv().await {
        let mut text = render(&event, &server_prefix);
        text.push('\n');
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

/// Forward stdin lines from a dedicated thread.
///
/// A blocking read cannot be cancelled, so the thread is detached and
/// simply ends at EOF or once the receiver is gone.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        forward_lines(stdin.lock(), tx);
    });

    rx
}

/// Blocking loop behind `spawn_stdin_reader`. A line that is not valid
/// UTF-8 is skipped; any other read error ends input.
fn forward_lines<R: BufRead>(input: R, tx: mpsc::Sender<String>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Skipping input line: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Stopped reading input: {}", e);
                break;
            }
        };
        if tx.blocking_send(line).is_err() {
            break;
        }
    }
    debug!("Input reader finished");
}

fn format_stats(stats: &ConnectionStats) -> String {
    format!(
        "Connected to {} for {}s | sent {} lines ({} bytes) | received {} lines ({} bytes)",
        stats.remote_addr,
        stats.duration_ms / 1000,
        stats.lines_sent,
        stats.bytes_sent,
        stats.lines_received,
        stats.bytes_received,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::display;
    use crate::error::CloseReason;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_invalid_utf8_input_line_is_skipped() {
        let input = std::io::Cursor::new(b"first\n\xff\xfe bad\nsecond\n".to_vec());
        let (tx, mut rx) = mpsc::channel(16);

        forward_lines(input, tx);

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv().unwrap(), "second");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/connect"), Command::Connect);
        assert_eq!(Command::parse("  /disconnect "), Command::Disconnect);
        assert_eq!(Command::parse("/status"), Command::Status);
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/bogus"), Command::Unknown("/bogus".to_string()));
        assert_eq!(Command::parse(" RESERVE B2 "), Command::Send("RESERVE B2".to_string()));
        assert_eq!(Command::parse("//connect"), Command::Send("/connect".to_string()));
        assert_eq!(Command::parse(""), Command::Send(String::new()));
    }

    #[test]
    fn test_render() {
        let addr = "127.0.0.1:12345".parse().unwrap();
        assert_eq!(
            render(&DisplayEvent::Line("SPOT-A1 RESERVED".to_string()), "Server: "),
            "Server: SPOT-A1 RESERVED"
        );
        assert_eq!(
            render(&DisplayEvent::Status(StatusEvent::Connected { remote_addr: addr }), ""),
            "Connected to server."
        );
        assert_eq!(
            render(
                &DisplayEvent::Status(StatusEvent::LostConnection { reason: CloseReason::PeerClosed }),
                ""
            ),
            "Lost connection to server (server closed the connection)."
        );
        assert_eq!(render(&DisplayEvent::Notice("hi".to_string()), "Server: "), "hi");
    }

    #[tokio::test]
    async fn test_render_loop_writes_until_handles_dropped() {
        let (handle, receiver) = display::channel();
        let (out, mut sink) = tokio::io::duplex(1024);

        let renderer = tokio::spawn(render_loop(receiver, "Server: ".to_string(), out));
        handle.line("SPOT-A1 RESERVED".to_string());
        handle.status(StatusEvent::Disconnected);
        drop(handle);

        renderer.await.unwrap().unwrap();
        let mut written = String::new();
        sink.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "Server: SPOT-A1 RESERVED\nDisconnected from server.\n");
    }

    #[tokio::test]
    async fn test_send_without_connection_reports_notice() {
        let (handle, mut receiver) = display::channel();
        let manager = Arc::new(ConnectionManager::new(Arc::new(Config::default()), handle.clone()));
        let terminal = Terminal::new(manager, handle);

        assert_eq!(terminal.execute(Command::Send("RESERVE B2".to_string())).await, Flow::Continue);
        assert_eq!(
            receiver.recv().await,
            Some(DisplayEvent::Notice("Failed to send: not connected".to_string()))
        );

        assert_eq!(terminal.execute(Command::Disconnect).await, Flow::Continue);
        assert_eq!(receiver.recv().await, Some(DisplayEvent::Notice("Not connected.".to_string())));
    }

    #[tokio::test]
    async fn test_run_connects_sends_and_quits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = listener.local_addr().unwrap().port();

        let (handle, mut receiver) = display::channel();
        let manager = Arc::new(ConnectionManager::new(Arc::new(config), handle.clone()));
        let terminal = Terminal::new(Arc::clone(&manager), handle);

        let (input_tx, input_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        for line in ["/connect", "RESERVE B2", "/quit", "never sent"] {
            input_tx.send(line.to_string()).await.unwrap();
        }

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        terminal.run(input_rx, shutdown_rx).await;

        assert_eq!(server.await.unwrap(), "RESERVE B2\n");
        assert!(!manager.is_connected().await);
        assert!(matches!(
            receiver.recv().await,
            Some(DisplayEvent::Status(StatusEvent::Connected { .. }))
        ));
        assert_eq!(receiver.recv().await, Some(DisplayEvent::Status(StatusEvent::Disconnected)));
    }
}
