//! Common types for the Lamport environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a node in a fixed-size cluster.
///
/// Ids are dense peer indices `0..cluster_size`; the relay maps them to live
/// connections during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the peer `offset` positions behind this node, wrapping
    /// modulo the cluster size: `(id - offset) mod cluster_size`.
    ///
    /// # Panics
    /// Panics if `cluster_size` is zero.
    pub fn peer(self, offset: u32, cluster_size: u32) -> NodeId {
        assert!(cluster_size > 0, "cluster size must be non-zero");
        let id = self.0 % cluster_size;
        let offset = offset % cluster_size;
        NodeId((id + cluster_size - offset) % cluster_size)
    }

    /// Returns the raw index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(NodeId)
    }
}
