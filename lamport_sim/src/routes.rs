//! Relay routing table: which connection currently owns each node id.

use crate::connection::ConnectionWriter;

use lamport_env::{EnvError, Message, NodeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared id -> connection map. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    inner: Arc<Mutex<Routes>>,
}

#[derive(Debug, Default)]
struct Routes {
    entries: BTreeMap<NodeId, Route>,
    next_serial: u64,
}

#[derive(Debug)]
struct Route {
    /// Distinguishes successive connections that held the same id
    serial: u64,
    writer: ConnectionWriter,
}

/// Proof of registration, needed to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: NodeId,
    serial: u64,
}

impl RoutingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection.
    ///
    /// A requested id is granted only if no live connection holds it. Without
    /// a request the lowest free id is assigned at the moment the HELLO is
    /// processed, so unrequested ids follow HELLO order, not accept order.
    /// On refusal returns the reason to send back to the node.
    pub fn register(
        &self,
        requested: Option<NodeId>,
        writer: ConnectionWriter,
    ) -> Result<Registration, String> {
        let mut routes = self.lock();
        let id = match requested {
            Some(id) if routes.entries.contains_key(&id) => {
                return Err(format!("id {id} already connected"));
            }
            Some(id) => id,
            None => (0..)
                .map(NodeId)
                .find(|id| !routes.entries.contains_key(id))
                .ok_or_else(|| "no free node id".to_string())?,
        };

        let serial = routes.next_serial;
        routes.next_serial += 1;
        routes.entries.insert(id, Route { serial, writer });
        Ok(Registration { id, serial })
    }

    /// Removes a registration. A newer connection that has since taken the
    /// same id is left alone.
    pub fn unregister(&self, registration: Registration) {
        let mut routes = self.lock();
        if routes
            .entries
            .get(&registration.id)
            .is_some_and(|route| route.serial == registration.serial)
        {
            routes.entries.remove(&registration.id);
        }
    }

    /// Queues `message`, unmodified, on the recipient's connection.
    pub fn forward(&self, message: &Message) -> Result<(), EnvError> {
        let writer = self
            .lock()
            .entries
            .get(&message.recipient)
            .map(|route| route.writer.clone())
            .ok_or(EnvError::UnknownRecipient(message.recipient))?;
        writer.send(message.encode())
    }

    /// Ids with a live connection, ascending.
    pub fn connected(&self) -> Vec<NodeId> {
        self.lock().entries.keys().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn writer() -> (ConnectionWriter, tokio::io::DuplexStream) {
        let (socket, peer) = tokio::io::duplex(1024);
        let (writer, _task) = ConnectionWriter::spawn(socket);
        (writer, peer)
    }

    #[tokio::test]
    async fn test_assigns_lowest_free_id() {
        let table = RoutingTable::new();
        let a = table.register(None, writer().0).unwrap();
        let b = table.register(None, writer().0).unwrap();
        assert_eq!((a.id, b.id), (NodeId(0), NodeId(1)));

        table.unregister(a);
        let c = table.register(None, writer().0).unwrap();
        assert_eq!(c.id, NodeId(0));

        let d = table.register(Some(NodeId(5)), writer().0).unwrap();
        assert_eq!(d.id, NodeId(5));
        assert_eq!(table.connected(), vec![NodeId(0), NodeId(1), NodeId(5)]);
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected() {
        let table = RoutingTable::new();
        table.register(Some(NodeId(2)), writer().0).unwrap();

        let reason = table.register(Some(NodeId(2)), writer().0).unwrap_err();
        assert_eq!(reason, "id 2 already connected");
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_new_owner() {
        let table = RoutingTable::new();
        let old = table.register(Some(NodeId(1)), writer().0).unwrap();
        table.unregister(old);
        let new = table.register(Some(NodeId(1)), writer().0).unwrap();

        table.unregister(old);
        assert_eq!(table.connected(), vec![NodeId(1)]);
        table.unregister(new);
        assert!(table.connected().is_empty());
    }

    #[tokio::test]
    async fn test_forward_to_registered_and_unknown() {
        let table = RoutingTable::new();
        let (w, mut peer) = writer();
        table.register(Some(NodeId(1)), w).unwrap();

        table.forward(&Message::new(NodeId(0), NodeId(1), 7)).unwrap();
        let err = table
            .forward(&Message::new(NodeId(0), NodeId(2), 7))
            .unwrap_err();
        assert!(matches!(err, EnvError::UnknownRecipient(NodeId(2))));

        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0\t1\t7\n");
    }
}
