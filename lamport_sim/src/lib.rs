//! Lamport Clock Cluster Simulator
//!
//! A small fixed-size cluster of nodes, each ticking at its own random rate,
//! exchanging Lamport-timestamped messages through a central relay. Every
//! node appends its events and clock values to a per-node log so the logical
//! ordering can be inspected after a run.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────┐          ┌──────────────┐          ┌──────────────────┐
//!  │ Node 0           │   TCP    │    Relay     │   TCP    │ Node 1           │
//!  │  VirtualMachine ─┼─────────►│  handler 0   │          │                  │
//!  │                  │          │      │       │          │                  │
//!  │                  │          │  RoutingTable│          │                  │
//!  │                  │          │      ▼       │          │                  │
//!  │                  │          │  writer 1 ───┼─────────►│ Receiver         │
//!  │                  │          └──────────────┘          │   ▼              │
//!  │                  │                                    │ InboundQueue     │
//!  │                  │                                    │   ▼              │
//!  │                  │                                    │ VirtualMachine   │
//!  └──────────────────┘                                    └──────────────────┘
//! ```
//!
//! The same `VirtualMachine` runs over TCP ([`TcpOutbound`], [`TokioContext`])
//! or fully in memory ([`SimNetwork`], [`SimContext`]) for deterministic
//! tests.
//!
//! # Usage
//!
//! ```ignore
//! use lamport_sim::{run_cluster, ClusterConfig};
//! use std::time::Duration;
//!
//! let config = ClusterConfig::default()
//!     .with_duration(Duration::from_secs(10))
//!     .with_seed(42);
//!
//! let report = run_cluster(config).await?;
//! println!("drift: {}", report.max_clock_drift());
//! ```
//!
//! [`TokioContext`]: lamport_env::TokioContext

mod cluster;
mod connection;
mod context;
mod event_log;
mod framing;
mod link;
mod network;
mod node;
mod receiver;
mod routes;
mod server;

pub use cluster::{run_cluster, run_linked, run_node, ClusterConfig, ClusterReport};
pub use connection::ConnectionWriter;
pub use context::SimContext;
pub use event_log::{format_record, log_path, EventLog, FileEventLog, MemoryEventLog};
pub use framing::HANDSHAKE_TIMEOUT;
pub use link::{connect, RelayLink, TcpOutbound};
pub use network::{SimNetwork, SimOutbound};
pub use node::{NodeConfig, NodeEvent, NodeReport, VirtualMachine};
pub use receiver::{receive_loop, spawn_receiver, ReceiverStats};
pub use routes::{Registration, RoutingTable};
pub use server::{start_relay, RelayConfig, RelayHandle};
