//! The relay: accepts node connections and forwards messages between them.
//!
//! Architecture: one task per connection plus an accept task.
//!
//! - **Accept task**: accepts TCP connections and spawns a handler for each,
//!   until shutdown.
//! - **Handler task** (one per node): runs the handshake, registers the
//!   connection in the [`RoutingTable`], then reads lines and forwards each
//!   decoded message to its recipient's [`ConnectionWriter`].
//! - **Writer task** (one per node): the only writer to that node's socket.
//!
//! The relay never inspects or rewrites logical times. A message for an id
//! with no live connection is dropped with a warning and the sending
//! handler keeps going.

use crate::connection::ConnectionWriter;
use crate::framing::{read_handshake, read_raw_line};
use crate::routes::RoutingTable;

use lamport_env::{EnvError, Handshake, Message, NodeId};
use std::net::SocketAddr;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for starting a relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    /// 0 lets the OS pick a free port
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

impl RelayConfig {
    /// Sets the bind host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Handle returned by [`start_relay`] to observe and stop the relay.
pub struct RelayHandle {
    shutdown: CancellationToken,
    routes: RoutingTable,
    accept_task: JoinHandle<()>,
}

impl RelayHandle {
    /// Ids with a live connection, ascending.
    pub fn connected(&self) -> Vec<NodeId> {
        self.routes.connected()
    }

    /// Signals the relay to stop and waits for every handler to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
    }
}

/// Binds the relay and starts accepting on a background task. Returns the
/// handle and the actual bound address.
pub async fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), EnvError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    info!("Relay listening on {}", addr);

    let shutdown = CancellationToken::new();
    let routes = RoutingTable::new();
    let accept_task = tokio::spawn(accept_loop(listener, routes.clone(), shutdown.clone()));

    Ok((
        RelayHandle {
            shutdown,
            routes,
            accept_task,
        },
        addr,
    ))
}

async fn accept_loop(listener: TcpListener, routes: RoutingTable, shutdown: CancellationToken) {
    let mut handlers = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {}", peer);
                handlers.spawn(handle_connection(
                    stream,
                    peer,
                    routes.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
    }

    drop(listener);
    while handlers.join_next().await.is_some() {}
    info!("Relay stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    routes: RoutingTable,
    shutdown: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (writer, writer_task) = ConnectionWriter::spawn(write_half);

    let handshake = tokio::select! {
        handshake = read_handshake(&mut reader) => handshake,
        _ = shutdown.cancelled() => return,
    };
    let requested = match handshake {
        Ok(Handshake::Hello { requested }) => requested,
        Ok(other) => {
            warn!("Expected HELLO from {}, got {}", peer, other.encode());
            reject(writer, writer_task, "expected HELLO".into()).await;
            return;
        }
        Err(e) => {
            warn!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let registration = match routes.register(requested, writer.clone()) {
        Ok(registration) => registration,
        Err(reason) => {
            warn!("Rejecting {}: {}", peer, reason);
            reject(writer, writer_task, reason).await;
            return;
        }
    };
    let id = registration.id;
    if writer.send(Handshake::Welcome { id }.encode()).is_err() {
        routes.unregister(registration);
        return;
    }
    info!("Node {} connected from {}", id, peer);

    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            read = read_raw_line(&mut reader, &mut buf) => read,
            _ = shutdown.cancelled() => break,
        };

        match read {
            Ok(0) => break,
            Ok(_) => match Message::decode(&String::from_utf8_lossy(&buf)) {
                Ok(message) => {
                    if let Err(e) = routes.forward(&message) {
                        warn!(from = %id, "Dropping {}: {}", message, e);
                    }
                }
                Err(e) => debug!(from = %id, "Ignoring line: {}", e),
            },
            Err(e) => {
                debug!(from = %id, "Read failed: {}", e);
                break;
            }
        }
    }

    routes.unregister(registration);
    info!("Node {} disconnected", id);
}

/// Sends a rejection and waits for it to reach the socket before the
/// connection is dropped.
async fn reject(writer: ConnectionWriter, writer_task: JoinHandle<()>, reason: String) {
    let _ = writer.send(Handshake::Rejected { reason }.encode());
    drop(writer);
    let _ = writer_task.await;
}
