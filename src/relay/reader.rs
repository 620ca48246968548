//! Inbound Line Relay
//!
//! Runs one read loop per connection. Each newline-delimited record is
//! handed to `on_line` in wire order; when the loop ends `on_closed` is
//! called exactly once with the reason.

use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::RelaySession;
use crate::error::CloseReason;

/// Longest record accepted unless configured otherwise, terminator included
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Starts read loops over a connection's input half
#[derive(Debug, Clone)]
pub struct LineRelay {
    buffer_size: usize,
    max_line_length: usize,
    session: Option<Arc<RelaySession>>,
}

impl LineRelay {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            session: None,
        }
    }

    /// A record longer than `max_line_length` ends the loop with a read error
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Count inbound records against `session`
    pub fn with_session(mut self, session: Arc<RelaySession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Spawn the read loop and return immediately.
    ///
    /// The loop stops on end of stream, on a read error (including an
    /// oversized record), or when
    /// `shutdown_rx` fires (or its sender is dropped). The reader is
    /// dropped before `on_closed` runs.
    pub fn start_reading<R, L, C, Fut>(
        &self,
        reader: R,
        shutdown_rx: broadcast::Receiver<()>,
        mut on_line: L,
        on_closed: C,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        L: FnMut(String) + Send + 'static,
        C: FnOnce(CloseReason) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let buffer_size = self.buffer_size;
        let max_line_length = self.max_line_length;
        let session = self.session.clone();

        tokio::spawn(async move {
            let reason = read_loop(
                reader,
                buffer_size,
                max_line_length,
                shutdown_rx,
                session,
                &mut on_line,
            )
            .await;
            debug!("Read loop finished: {}", reason);
            on_closed(reason).await;
        })
    }
}

async fn read_loop<R, L>(
    reader: R,
    buffer_size: usize,
    max_line_length: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
    session: Option<Arc<RelaySession>>,
    on_line: &mut L,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    L: FnMut(String),
{
    let mut reader = BufReader::with_capacity(buffer_size, reader);
    let mut record = Vec::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                return CloseReason::LocalShutdown;
            }
            result = read_record(&mut reader, &mut record, max_line_length) => {
                match result {
                    Ok(0) => return CloseReason::PeerClosed,
                    Ok(n) => {
                        if let Some(session) = &session {
                            session.record_received(n as u64);
                        }
                        let line = decode_line(&record);
                        debug!(bytes = n, "Received line: {}", line);
                        on_line(line);
                        record.clear();
                    }
                    Err(e) => {
                        warn!("Read failed: {}", e);
                        return CloseReason::ReadError(e.to_string());
                    }
                }
            }
        }
    }
}

/// Append bytes up to and including the next `\n` to `record`.
///
/// Returns the number of bytes appended, `0` at end of stream. Fails with
/// `InvalidData` once the record would exceed `max_len`.
async fn read_record<R>(reader: &mut R, record: &mut Vec<u8>, max_len: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }

        let (done, used) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };

        if record.len() + used > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", max_len),
            ));
        }

        record.extend_from_slice(&available[..used]);
        reader.consume(used);
        total += used;

        if done {
            return Ok(total);
        }
    }
}

/// Strip the record terminator (`\n` or `\r\n`) and decode as UTF-8
fn decode_line(record: &[u8]) -> String {
    let mut end = record.len();
    if end > 0 && record[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && record[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&record[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"SPOT-A1 RESERVED\n"), "SPOT-A1 RESERVED");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"unterminated"), "unterminated");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_lines_delivered_in_order_then_peer_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let handle = LineRelay::new(1024).start_reading(
            client,
            shutdown_rx,
            move |line| {
                let _ = line_tx.send(line);
            },
            move |reason| async move {
                let _ = closed_tx.send(reason);
            },
        );

        let expected: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        for line in &expected {
            server.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        }
        drop(server);

        let reason = timeout(Duration::from_secs(5), closed_rx).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
        handle.await.unwrap();

        let mut received = Vec::new();
        while let Ok(line) = line_rx.try_recv() {
            received.push(line);
        }
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_records_split_across_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);

        let handle = LineRelay::new(1024).start_reading(
            client,
            shutdown_rx,
            move |line| sink.lock().unwrap().push(line),
            |_| async {},
        );

        server.write_all(b"SPOT-").await.unwrap();
        server.write_all(b"A1 RESERVED\nSPOT-B2 FREE\nlast").await.unwrap();
        drop(server);
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["SPOT-A1 RESERVED", "SPOT-B2 FREE", "last"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let (client, _server) = tokio::io::duplex(64);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (closed_tx, closed_rx) = oneshot::channel();

        let handle = LineRelay::new(1024).start_reading(
            client,
            shutdown_rx,
            |_| {},
            move |reason| async move {
                let _ = closed_tx.send(reason);
            },
        );

        shutdown_tx.send(()).unwrap();
        let reason = timeout(Duration::from_secs(5), closed_rx).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::LocalShutdown);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_after_line() {
        let mock = tokio_test::io::Builder::new()
            .read(b"SPOT-A1 RESERVED\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
            .build();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        let handle = LineRelay::new(1024).start_reading(
            mock,
            shutdown_rx,
            move |line| {
                let _ = line_tx.send(line);
            },
            move |reason| async move {
                let _ = closed_tx.send(reason);
            },
        );

        let reason = timeout(Duration::from_secs(5), closed_rx).await.unwrap().unwrap();
        assert!(matches!(reason, CloseReason::ReadError(ref e) if e.contains("reset by peer")));
        assert!(reason.is_remote());
        handle.await.unwrap();

        assert_eq!(line_rx.try_recv().unwrap(), "SPOT-A1 RESERVED");
        assert!(line_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_line_ends_loop() {
        let (client, mut server) = tokio::io::duplex(8192);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let (closed_tx, closed_rx) = oneshot::channel();

        let handle = LineRelay::new(1024)
            .with_max_line_length(1024)
            .start_reading(
                client,
                shutdown_rx,
                move |line| sink.lock().unwrap().push(line),
                move |reason| async move {
                    let _ = closed_tx.send(reason);
                },
            );

        // Exactly at the limit, then a record with no terminator in sight
        let mut at_limit = vec![b'a'; 1023];
        at_limit.push(b'\n');
        server.write_all(&at_limit).await.unwrap();
        server.write_all(&[b'x'; 4096]).await.unwrap();

        let reason = timeout(Duration::from_secs(5), closed_rx).await.unwrap().unwrap();
        match reason {
            CloseReason::ReadError(e) => assert!(e.contains("exceeds 1024 bytes"), "{}", e),
            other => panic!("unexpected close reason: {}", other),
        }
        handle.await.unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 1023);
    }

    #[tokio::test]
    async fn test_session_counts_inbound_records() {
        let (client, mut server) = tokio::io::duplex(64);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let session = Arc::new(RelaySession::new(
            "conn".to_string(),
            "127.0.0.1:12345".parse().unwrap(),
        ));

        let handle = LineRelay::new(1024)
            .with_session(Arc::clone(&session))
            .start_reading(client, shutdown_rx, |_| {}, |_| async {});

        server.write_all(b"one\r\ntwo\n").await.unwrap();
        drop(server);
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let stats = session.to_stats();
        assert_eq!(stats.lines_received, 2);
        assert_eq!(stats.bytes_received, 9);
    }
}
