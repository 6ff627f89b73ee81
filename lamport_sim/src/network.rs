//! Simulated in-memory network.
//!
//! `SimNetwork` plays the relay's role for in-process nodes: a send is
//! delivered straight into the recipient's `InboundQueue`. Every delivery is
//! recorded so tests can assert on exactly what left each node.

use async_trait::async_trait;
use lamport_env::{EnvError, InboundQueue, Message, NodeId, Outbound};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared routing state for a set of in-process nodes.
#[derive(Clone, Default)]
pub struct SimNetwork {
    /// Inbound queue per attached node
    queues: Arc<Mutex<HashMap<NodeId, InboundQueue>>>,

    /// Every successfully delivered message, in delivery order
    deliveries: Arc<Mutex<Vec<Message>>>,

    /// Sends to ids with no attached queue
    undeliverable: Arc<AtomicU64>,
}

impl SimNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a node and returns its inbound queue. Re-attaching an id
    /// replaces the previous queue.
    pub fn attach(&self, id: NodeId) -> InboundQueue {
        let queue = InboundQueue::new();
        self.queues.lock().unwrap().insert(id, queue.clone());
        queue
    }

    /// Creates the outbound handle for `local_id`.
    pub fn outbound(&self, local_id: NodeId) -> SimOutbound {
        SimOutbound {
            local_id,
            network: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns every delivered message so far.
    pub fn deliveries(&self) -> Vec<Message> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Returns the number of undeliverable sends.
    pub fn undeliverable(&self) -> u64 {
        self.undeliverable.load(Ordering::Relaxed)
    }

    fn deliver(&self, message: Message) -> Result<(), EnvError> {
        let queue = self.queues.lock().unwrap().get(&message.recipient).cloned();
        match queue {
            Some(queue) => {
                queue.push(message);
                self.deliveries.lock().unwrap().push(message);
                Ok(())
            }
            None => {
                self.undeliverable.fetch_add(1, Ordering::Relaxed);
                Err(EnvError::UnknownRecipient(message.recipient))
            }
        }
    }
}

/// Per-node outbound handle on a [`SimNetwork`].
pub struct SimOutbound {
    local_id: NodeId,
    network: SimNetwork,
    closed: AtomicBool,
}

#[async_trait]
impl Outbound for SimOutbound {
    async fn send(&self, message: Message) -> Result<(), EnvError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EnvError::ConnectionClosed);
        }
        self.network.deliver(message)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}
