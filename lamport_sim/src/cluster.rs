//! Running nodes against a relay, alone or as a whole local cluster.

use crate::event_log::FileEventLog;
use crate::link::{self, RelayLink};
use crate::node::{NodeConfig, NodeReport, VirtualMachine};
use crate::receiver::spawn_receiver;
use crate::server::{start_relay, RelayConfig};

use lamport_env::{EnvError, InboundQueue, NodeContext, NodeId, TokioContext};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for a local cluster run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of nodes (at least 3)
    pub nodes: u32,

    /// How long each node ticks
    pub run_duration: Duration,

    /// Base seed; node `i` uses `seed + i`. `None` draws from entropy.
    pub seed: Option<u64>,

    /// Directory receiving `log<id>.txt` files
    pub log_dir: PathBuf,

    /// Host the relay binds to
    pub host: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            run_duration: Duration::from_secs(60),
            seed: None,
            log_dir: PathBuf::from("."),
            host: "127.0.0.1".into(),
        }
    }
}

impl ClusterConfig {
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.run_duration = duration;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    fn node_config(&self, id: NodeId) -> NodeConfig {
        NodeConfig::new(id)
            .with_cluster_size(self.nodes)
            .with_duration(self.run_duration)
    }

    fn node_context(&self, id: NodeId) -> TokioContext {
        match self.seed {
            Some(seed) => TokioContext::with_seed(seed.wrapping_add(u64::from(id.index()))),
            None => TokioContext::new(),
        }
    }
}

/// Result of a cluster run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub seed: Option<u64>,
    pub run_duration_secs: f64,
    pub nodes: Vec<NodeReport>,
}

impl ClusterReport {
    /// Spread between the highest and lowest final clock.
    pub fn max_clock_drift(&self) -> u64 {
        let clocks = self.nodes.iter().map(|n| n.final_clock);
        match (clocks.clone().max(), clocks.min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        }
    }

    /// Messages sent across all nodes.
    pub fn total_sent(&self) -> u64 {
        self.nodes.iter().map(|n| n.messages_sent).sum()
    }

    /// Messages processed across all nodes.
    pub fn total_received(&self) -> u64 {
        self.nodes.iter().map(|n| n.receives).sum()
    }
}

/// Connects to the relay at `addr` and runs one node to completion.
///
/// `config.id` is replaced by whatever id the relay confirms, so pass
/// `requested = None` to let the relay pick.
pub async fn run_node<Ctx: NodeContext>(
    addr: &str,
    requested: Option<NodeId>,
    config: NodeConfig,
    context: Arc<Ctx>,
    log_dir: &Path,
) -> Result<NodeReport, EnvError> {
    let link = link::connect(addr, requested).await?;
    run_linked(link, config, context, log_dir).await
}

/// Runs one node over an established relay link.
pub async fn run_linked<Ctx: NodeContext>(
    link: RelayLink,
    config: NodeConfig,
    context: Arc<Ctx>,
    log_dir: &Path,
) -> Result<NodeReport, EnvError> {
    let RelayLink {
        id,
        outbound,
        reader,
    } = link;
    let config = NodeConfig { id, ..config };
    config.validate()?;

    let log = FileEventLog::open(log_dir, id)?;
    debug!(node = %id, "Logging to {}", log.path().display());

    let inbox = InboundQueue::new();
    let shutdown = CancellationToken::new();
    let receiver = spawn_receiver(id, reader, inbox.clone(), shutdown.clone());

    let mut vm = match VirtualMachine::new(config, context, Arc::new(outbound), inbox, log) {
        Ok(vm) => vm,
        Err(e) => {
            shutdown.cancel();
            return Err(e);
        }
    };
    let report = vm.run(&shutdown).await;

    match receiver.await {
        Ok(stats) => debug!(
            node = %id,
            received = stats.received,
            dropped = stats.dropped,
            "Receiver stopped"
        ),
        Err(e) => warn!(node = %id, "Receiver task failed: {}", e),
    }
    Ok(report)
}

/// Starts a relay on a free port and runs `config.nodes` nodes against it.
///
/// Every node connects before any starts ticking, so no early send finds
/// its recipient missing.
pub async fn run_cluster(config: ClusterConfig) -> Result<ClusterReport, EnvError> {
    if config.nodes < 3 {
        return Err(EnvError::config(format!(
            "a cluster needs at least 3 nodes, got {}",
            config.nodes
        )));
    }

    let relay_config = RelayConfig::default()
        .with_host(config.host.clone())
        .with_port(0);
    let (relay, addr) = start_relay(relay_config).await?;
    let addr = addr.to_string();

    let mut links = Vec::with_capacity(config.nodes as usize);
    for i in 0..config.nodes {
        match link::connect(&addr, Some(NodeId(i))).await {
            Ok(link) => links.push(link),
            Err(e) => {
                relay.stop().await;
                return Err(e);
            }
        }
    }
    info!(
        nodes = config.nodes,
        seed = ?config.seed,
        "Cluster connected, running for {:?}",
        config.run_duration
    );

    let tasks: Vec<_> = links
        .into_iter()
        .map(|link| {
            let context = Arc::new(config.node_context(link.id));
            let node_config = config.node_config(link.id);
            let log_dir = config.log_dir.clone();
            tokio::spawn(async move { run_linked(link, node_config, context, &log_dir).await })
        })
        .collect();

    let mut nodes = Vec::with_capacity(tasks.len());
    let mut failure = None;
    for task in tasks {
        match task.await {
            Ok(Ok(report)) => nodes.push(report),
            Ok(Err(e)) => {
                error!("Node failed: {}", e);
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("Node task panicked: {}", e);
                failure.get_or_insert(EnvError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    e.to_string(),
                )));
            }
        }
    }

    relay.stop().await;
    if let Some(e) = failure {
        return Err(e);
    }

    Ok(ClusterReport {
        seed: config.seed,
        run_duration_secs: config.run_duration.as_secs_f64(),
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::event_log::log_path;
    use crate::link::connect;
    use crate::receiver::spawn_receiver;
    use lamport_env::{LogicalClock, Message, Outbound};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lamport-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_max_clock_drift() {
        let report = ClusterReport {
            seed: Some(1),
            run_duration_secs: 1.0,
            nodes: vec![
                NodeReport {
                    final_clock: 12,
                    ..Default::default()
                },
                NodeReport {
                    final_clock: 30,
                    ..Default::default()
                },
                NodeReport {
                    final_clock: 19,
                    ..Default::default()
                },
            ],
        };
        assert_eq!(report.max_clock_drift(), 18);

        let empty = ClusterReport {
            seed: None,
            run_duration_secs: 0.0,
            nodes: vec![],
        };
        assert_eq!(empty.max_clock_drift(), 0);
    }

    #[tokio::test]
    async fn test_cluster_too_small() {
        let err = run_cluster(ClusterConfig::default().with_nodes(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::InvalidConfig(_)));
    }

    /// A(0) sends Message(0, 1, 5) through the relay; B(1) at clock 3 ends at 6.
    #[tokio::test]
    async fn test_message_through_relay_updates_clock() {
        let (relay, addr) = start_relay(RelayConfig::default().with_port(0))
            .await
            .unwrap();
        let addr = addr.to_string();

        let a = connect(&addr, Some(NodeId(0))).await.unwrap();
        let b = connect(&addr, Some(NodeId(1))).await.unwrap();
        let _c = connect(&addr, Some(NodeId(2))).await.unwrap();

        let inbox = InboundQueue::new();
        let shutdown = CancellationToken::new();
        let receiver = spawn_receiver(b.id, b.reader, inbox.clone(), shutdown.clone());

        let mut vm = VirtualMachine::new(
            NodeConfig::new(b.id),
            SimContext::shared(7),
            Arc::new(b.outbound),
            inbox.clone(),
            crate::event_log::MemoryEventLog::new(),
        )
        .unwrap()
        .with_clock(LogicalClock::starting_at(3));

        a.outbound
            .send(Message::new(NodeId(0), NodeId(1), 5))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while inbox.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message should arrive");

        vm.step().await;
        assert_eq!(vm.clock(), 6);

        shutdown.cancel();
        receiver.await.unwrap();
        relay.stop().await;
    }

    #[tokio::test]
    async fn test_run_cluster_writes_logs() {
        let dir = temp_dir("cluster");
        let config = ClusterConfig::default()
            .with_duration(Duration::from_millis(600))
            .with_seed(42)
            .with_log_dir(&dir);

        let report = run_cluster(config).await.unwrap();
        assert_eq!(report.nodes.len(), 3);
        assert_eq!(report.seed, Some(42));

        for (i, node) in report.nodes.iter().enumerate() {
            assert_eq!(node.id, i as u32);
            assert!(node.ticks >= 1);
            // Originating ticks add exactly one; a stale receive adds nothing
            assert!(node.final_clock >= node.ticks - node.receives);

            let contents = std::fs::read_to_string(log_path(&dir, NodeId(i as u32))).unwrap();
            let mut lines = contents.lines();
            assert!(lines.next().unwrap().starts_with("TICKS="));
            assert_eq!(lines.count() as u64, node.ticks);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_run_node_rejected_id() {
        let (relay, addr) = start_relay(RelayConfig::default().with_port(0))
            .await
            .unwrap();
        let addr = addr.to_string();
        let _holder = connect(&addr, Some(NodeId(0))).await.unwrap();

        let err = run_node(
            &addr,
            Some(NodeId(0)),
            NodeConfig::new(NodeId(0)),
            SimContext::shared(1),
            &temp_dir("rejected"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EnvError::HandshakeRejected(_)));

        relay.stop().await;
    }
}
