//! Outbound transport abstraction for simulated nodes.

use crate::error::EnvError;
use crate::message::Message;
use crate::types::NodeId;
use async_trait::async_trait;

/// The write side of a node's link to the rest of the cluster.
///
/// # Implementations
///
/// - **Production**: a TCP connection to the relay
/// - **Simulation**: direct delivery into peer queues
///
/// # Packet Flow
///
/// ```text
/// Node A                     Relay                      Node B
///   |                           |                          |
///   |-- send(msg to B) -------->|                          |
///   |                           |-- forward(msg) --------->|
///   |                           |                          |-- receiver -> queue
/// ```
#[async_trait]
pub trait Outbound: Send + Sync + 'static {
    /// Sends one message towards `message.recipient`.
    ///
    /// Returns once the message has been handed to the transport and
    /// flushed, so it is visible to the relay before the caller's next tick.
    /// Success does not guarantee delivery.
    async fn send(&self, message: Message) -> Result<(), EnvError>;

    /// Closes the link. Later sends fail with `ConnectionClosed`.
    async fn close(&self);

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId;
}
