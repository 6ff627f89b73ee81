//! Background message intake for a node.
//!
//! The receiver keeps draining the node's connection while the node sleeps
//! between ticks, so messages never pile up inside the transport. Each
//! decoded line is pushed onto the node's `InboundQueue`; garbled lines are
//! dropped without touching the clock.

use crate::framing::read_raw_line;

use lamport_env::{EnvError, InboundQueue, Message, NodeId};
use tokio::io::AsyncBufRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Give up after this many back-to-back non-fatal read errors.
const MAX_CONSECUTIVE_ERRORS: u32 = 16;

/// Counters returned when a receiver stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Messages pushed onto the inbox
    pub received: u64,

    /// Lines that failed to decode or read
    pub dropped: u64,
}

/// Spawns [`receive_loop`] on the runtime.
pub fn spawn_receiver<R>(
    node: NodeId,
    reader: R,
    inbox: InboundQueue,
    shutdown: CancellationToken,
) -> JoinHandle<ReceiverStats>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(receive_loop(node, reader, inbox, shutdown))
}

/// Reads lines until EOF, a closed connection, or `shutdown`.
pub async fn receive_loop<R>(
    node: NodeId,
    mut reader: R,
    inbox: InboundQueue,
    shutdown: CancellationToken,
) -> ReceiverStats
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReceiverStats::default();
    let mut buf = Vec::new();
    let mut consecutive_errors = 0;

    while !shutdown.is_cancelled() {
        let read = tokio::select! {
            read = read_raw_line(&mut reader, &mut buf) => read,
            _ = shutdown.cancelled() => break,
        };

        match read {
            Ok(0) => {
                debug!(%node, "Connection closed by relay");
                break;
            }
            Ok(_) => {
                consecutive_errors = 0;
                match Message::decode(&String::from_utf8_lossy(&buf)) {
                    Ok(message) => {
                        inbox.push(message);
                        stats.received += 1;
                    }
                    Err(e) => {
                        stats.dropped += 1;
                        trace!(%node, "Dropping line: {}", e);
                    }
                }
            }
            Err(e) => {
                let err = EnvError::from(e);
                if err.is_closed() {
                    debug!(%node, "Connection ended: {}", err);
                    break;
                }
                stats.dropped += 1;
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(%node, "Giving up after repeated read errors: {}", err);
                    break;
                }
                trace!(%node, "Read error: {}", err);
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_pushes_messages_in_order() {
        let (mut client, server) = tokio::io::duplex(1024);
        let inbox = InboundQueue::new();
        let handle = spawn_receiver(
            NodeId(1),
            BufReader::new(server),
            inbox.clone(),
            CancellationToken::new(),
        );

        client
            .write_all(b"0\t1\t1\n2\t1\t2\n0\t1\t3\n")
            .await
            .unwrap();
        drop(client);

        let stats = handle.await.unwrap();
        assert_eq!(stats.received, 3);
        let times: Vec<u64> = std::iter::from_fn(|| inbox.pop().map(|(m, _)| m.logical_time)).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_receiver() {
        let (mut client, server) = tokio::io::duplex(1024);
        let inbox = InboundQueue::new();
        let handle = spawn_receiver(
            NodeId(0),
            BufReader::new(server),
            inbox.clone(),
            CancellationToken::new(),
        );

        client
            .write_all(b"garbage\n1\t0\n\xff\xfe\n1\t0\t9\n")
            .await
            .unwrap();
        drop(client);

        let stats = handle.await.unwrap();
        assert_eq!(stats, ReceiverStats { received: 1, dropped: 3 });
        assert_eq!(inbox.pop().unwrap().0, Message::new(NodeId(1), NodeId(0), 9));
    }

    #[tokio::test]
    async fn test_overlong_line_dropped() {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        let inbox = InboundQueue::new();
        let handle = spawn_receiver(
            NodeId(1),
            BufReader::new(server),
            inbox.clone(),
            CancellationToken::new(),
        );

        let mut bytes = vec![b'1'; crate::framing::MAX_LINE_LEN * 4];
        bytes.extend_from_slice(b"\n2\t1\t6\n");
        client.write_all(&bytes).await.unwrap();
        drop(client);

        let stats = handle.await.unwrap();
        assert_eq!(stats, ReceiverStats { received: 1, dropped: 1 });
        assert_eq!(inbox.pop().unwrap().0, Message::new(NodeId(2), NodeId(1), 6));
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_while_blocked() {
        let (_client, server) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let handle = spawn_receiver(
            NodeId(2),
            BufReader::new(server),
            InboundQueue::new(),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receiver should stop")
            .unwrap();
        assert_eq!(stats, ReceiverStats::default());
    }
}
