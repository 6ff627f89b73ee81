//! Lamport Environment Abstraction Layer
//!
//! Shared leaf types for the Lamport clock cluster simulator, plus the
//! "Sans-IO" seams that let the node event loop run against real sockets
//! and the wall clock (**Production**, tokio) or against a virtual clock and
//! an in-memory network (**Simulation**, `lamport_sim`).
//!
//! # What lives here
//!
//! - [`LogicalClock`]: the Lamport counter and its `max(clock, v + 1)` rule
//! - [`Message`]: the `sender\trecipient\tlogical_time` wire record
//! - [`Handshake`]: the one-line id negotiation preceding data lines
//! - [`InboundQueue`]: the FIFO between a node's receiver and its loop
//! - [`NodeContext`]: time, sleep and randomness, injectable per run
//! - [`Outbound`]: the write side of a node's link to the relay
//!
//! # Example
//!
//! ```ignore
//! use lamport_env::{NodeContext, Outbound};
//!
//! async fn node_loop<Ctx: NodeContext, Out: Outbound>(ctx: &Ctx, out: &Out) {
//!     loop {
//!         let r = ctx.roll(1, 10);
//!         // ... send or internal event
//!         ctx.sleep(Duration::from_millis(250)).await;
//!     }
//! }
//! ```

mod clock;
mod context;
mod error;
mod message;
mod network;
mod queue;
mod tokio_impl;
mod types;

pub use clock::LogicalClock;
pub use context::NodeContext;
pub use error::EnvError;
pub use message::{Handshake, Message, DELIMITER};
pub use network::Outbound;
pub use queue::InboundQueue;
pub use tokio_impl::TokioContext;
pub use types::NodeId;
