//! Per-connection outbound writer for the relay.
//!
//! Each accepted connection owns one writer task. Other connections hand it
//! lines through an unbounded channel, so forwarding never waits on a slow
//! recipient socket and concurrent forwards to the same recipient never
//! interleave bytes mid-line.

use crate::framing::write_line;

use lamport_env::EnvError;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cloneable handle that queues lines for one connection's socket.
#[derive(Debug, Clone)]
pub struct ConnectionWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionWriter {
    /// Spawns the writer task for `writer`.
    ///
    /// The task exits, shutting the write side down, once every handle has
    /// been dropped or a write fails.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(rx, writer));
        (Self { tx }, task)
    }

    /// Queues `line` (without trailing newline) for the socket.
    pub fn send(&self, line: String) -> Result<(), EnvError> {
        self.tx.send(line).map_err(|_| EnvError::ConnectionClosed)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop<W>(mut rx: mpsc::UnboundedReceiver<String>, writer: W)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            debug!("Connection write failed: {}", e);
            break;
        }
    }
    rx.close();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_lines_are_written_in_order() {
        let (socket, mut peer) = tokio::io::duplex(1024);
        let (writer, task) = ConnectionWriter::spawn(socket);

        writer.send("0\t1\t1".to_string()).unwrap();
        writer.clone().send("2\t1\t4".to_string()).unwrap();
        drop(writer);
        task.await.unwrap();

        let mut received = String::new();
        peer.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "0\t1\t1\n2\t1\t4\n");
    }

    #[tokio::test]
    async fn test_send_fails_after_peer_goes_away() {
        let (socket, peer) = tokio::io::duplex(16);
        drop(peer);
        let (writer, task) = ConnectionWriter::spawn(socket);

        writer.send("0\t1\t1".to_string()).unwrap();
        task.await.unwrap();

        assert!(writer.is_closed());
        assert!(writer.send("0\t1\t2".to_string()).unwrap_err().is_closed());
    }
}
