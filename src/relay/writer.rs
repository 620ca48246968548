//! Outbound Line Writer

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::WriteError;

/// Trim `text` and append the terminator.
///
/// Lines with an embedded CR or LF are rejected: they would split into
/// several records on the wire.
pub fn prepare_line(text: &str) -> Result<String, WriteError> {
    let text = text.trim();
    if text.contains(['\n', '\r']) {
        return Err(WriteError::InvalidLine);
    }

    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');
    Ok(line)
}

/// Write one line and flush it. Returns the number of bytes written.
pub async fn write_line<W>(writer: &mut W, text: &str) -> Result<usize, WriteError>
where
    W: AsyncWrite + Unpin,
{
    let line = prepare_line(text)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(line.len())
}
