//! Node-side connection to the relay.
//!
//! `connect` opens the TCP stream, runs the handshake and splits the socket:
//! the write half becomes a [`TcpOutbound`] used by the node loop, the read
//! half goes to the receiver task.

use crate::framing::{read_handshake, write_line};

use async_trait::async_trait;
use lamport_env::{EnvError, Handshake, Message, NodeId, Outbound};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// An established, identified link to the relay.
pub struct RelayLink {
    /// Identity the relay confirmed
    pub id: NodeId,

    /// Write side, for the node loop
    pub outbound: TcpOutbound,

    /// Read side, for the receiver
    pub reader: BufReader<OwnedReadHalf>,
}

/// Connects to the relay at `addr` and negotiates an identity.
///
/// With `requested` set the relay must grant exactly that id; otherwise it
/// assigns one. Fails with `ConnectFailure` if the relay is unreachable or
/// hangs up, and `HandshakeRejected` if it refuses.
pub async fn connect(addr: &str, requested: Option<NodeId>) -> Result<RelayLink, EnvError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| EnvError::connect(addr, e))?;
    stream.set_nodelay(true).map_err(|e| EnvError::connect(addr, e))?;

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    write_line(&mut writer, &Handshake::Hello { requested }.encode())
        .await
        .map_err(|e| EnvError::connect(addr, e))?;

    let id = match read_handshake(&mut reader).await {
        Ok(Handshake::Welcome { id }) => id,
        Ok(Handshake::Rejected { reason }) => return Err(EnvError::HandshakeRejected(reason)),
        Ok(other) => {
            return Err(EnvError::connect(
                addr,
                format!("unexpected handshake reply: {}", other.encode()),
            ))
        }
        Err(e) => return Err(EnvError::connect(addr, e)),
    };

    if let Some(wanted) = requested {
        if wanted != id {
            return Err(EnvError::HandshakeRejected(format!(
                "asked for id {wanted}, relay assigned {id}"
            )));
        }
    }

    info!("Node {} connected to relay at {}", id, addr);
    Ok(RelayLink {
        id,
        outbound: TcpOutbound::new(id, writer),
        reader,
    })
}

/// [`Outbound`] over the write half of the relay connection.
///
/// Each send writes one line and flushes before returning.
pub struct TcpOutbound {
    local_id: NodeId,
    writer: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
}

impl TcpOutbound {
    fn new(local_id: NodeId, writer: BufWriter<OwnedWriteHalf>) -> Self {
        Self {
            local_id,
            writer: Mutex::new(Some(writer)),
        }
    }
}

#[async_trait]
impl Outbound for TcpOutbound {
    async fn send(&self, message: Message) -> Result<(), EnvError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(EnvError::ConnectionClosed)?;
        write_line(writer, &message.encode()).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(node = %self.local_id, "Shutdown of relay link failed: {}", e);
            }
        }
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::read_raw_line;
    use tokio::net::TcpListener;

    /// Accepts one connection, expects HELLO and answers with `reply`.
    async fn fake_relay(reply: Handshake) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            let mut lines = Vec::new();
            let hello = read_handshake(&mut reader).await.unwrap();
            lines.push(hello.encode());
            write_line(&mut write_half, &reply.encode()).await.unwrap();

            let mut buf = Vec::new();
            while read_raw_line(&mut reader, &mut buf).await.unwrap() > 0 {
                lines.push(String::from_utf8_lossy(&buf).trim_end().to_string());
            }
            lines
        });

        (addr, task)
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let (addr, relay) = fake_relay(Handshake::Welcome { id: NodeId(1) }).await;

        let link = connect(&addr, Some(NodeId(1))).await.unwrap();
        assert_eq!(link.id, NodeId(1));
        assert_eq!(link.outbound.local_id(), NodeId(1));

        link.outbound
            .send(Message::new(NodeId(1), NodeId(0), 4))
            .await
            .unwrap();
        link.outbound.close().await;

        let lines = relay.await.unwrap();
        assert_eq!(lines, vec!["HELLO\t1".to_string(), "1\t0\t4".to_string()]);

        let err = link
            .outbound
            .send(Message::new(NodeId(1), NodeId(0), 5))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_rejection_is_fatal() {
        let (addr, _relay) = fake_relay(Handshake::Rejected {
            reason: "id 0 already connected".to_string(),
        })
        .await;

        match connect(&addr, Some(NodeId(0))).await {
            Err(EnvError::HandshakeRejected(reason)) => {
                assert_eq!(reason, "id 0 already connected")
            }
            other => panic!("expected rejection, got {:?}", other.map(|l| l.id)),
        }
    }

    #[tokio::test]
    async fn test_unreachable_relay() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr, None).await.err().unwrap();
        assert!(matches!(err, EnvError::ConnectFailure(_)));
    }
}
