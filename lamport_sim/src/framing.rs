//! Newline-delimited line framing over async streams.
//!
//! Every record on the wire, handshake or data, is one `\n`-terminated text
//! line. Writers flush after each line so a send is visible to the peer
//! before the caller moves on.

use lamport_env::{EnvError, Handshake};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How long either side waits for the other's handshake line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted line, terminator included. Far above any real record.
pub const MAX_LINE_LEN: usize = 1024;

/// Writes `line` plus a newline and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Reads one raw line into `buf` (cleared first). Returns the number of
/// bytes consumed, `Ok(0)` only at EOF.
///
/// Bytes are not required to be UTF-8; callers decode lossily so a garbled
/// line fails message decoding instead of the read. A line longer than
/// [`MAX_LINE_LEN`] is consumed through its newline and leaves `buf` empty,
/// which no decoder accepts.
pub async fn read_raw_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)
        .await?;

    if read == MAX_LINE_LEN && buf.last() != Some(&b'\n') {
        buf.clear();
        return Ok(read + discard_line(reader).await?);
    }
    Ok(read)
}

/// Consumes bytes up to and including the next newline (or EOF).
async fn discard_line<R>(reader: &mut R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (newline, available) = {
            let chunk = reader.fill_buf().await?;
            (chunk.iter().position(|&b| b == b'\n'), chunk.len())
        };
        match newline {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(skipped + i + 1);
            }
            None if available == 0 => return Ok(skipped),
            None => {
                reader.consume(available);
                skipped += available;
            }
        }
    }
}

/// Reads and decodes one handshake frame, waiting at most
/// [`HANDSHAKE_TIMEOUT`].
pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake, EnvError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_raw_line(reader, &mut buf))
        .await
        .map_err(|_| {
            EnvError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "handshake timed out",
            ))
        })??;

    if read == 0 {
        return Err(EnvError::ConnectionClosed);
    }
    Handshake::decode(&String::from_utf8_lossy(&buf))
}
