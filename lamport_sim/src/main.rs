//! Lamport Clock Cluster Simulator CLI
//!
//! Run the relay and nodes as separate processes, or a whole local cluster
//! in one.

use clap::{Parser, Subcommand};
use lamport_env::{EnvError, NodeId, TokioContext};
use lamport_sim::{
    run_cluster, run_node, start_relay, ClusterConfig, ClusterReport, NodeConfig, RelayConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lamport logical clock cluster simulator
#[derive(Parser, Debug)]
#[command(name = "lamport-sim")]
#[command(about = "Simulate a cluster of nodes exchanging Lamport-timestamped messages", long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the message relay until interrupted
    Relay {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
    },

    /// Run a single node against a running relay
    Node {
        /// Relay host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Relay port
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// Node id to claim (relay assigns one if omitted)
        #[arg(long)]
        id: Option<u32>,

        /// Number of nodes in the cluster
        #[arg(long, default_value = "3")]
        cluster_size: u32,

        /// Run duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: f64,

        /// RNG seed (random if omitted)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Directory for the log file
        #[arg(long, default_value = ".")]
        log_dir: PathBuf,
    },

    /// Run a relay and a full cluster in this process
    Cluster {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: u32,

        /// Run duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: f64,

        /// Base seed; node i uses seed + i (random if omitted)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Directory for the log files
        #[arg(long, default_value = ".")]
        log_dir: PathBuf,

        /// JSON output for scripting
        #[arg(long)]
        json: bool,
    },
}

fn duration_arg(secs: f64) -> Result<Duration, EnvError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| EnvError::config(format!("invalid duration: {secs}")))
}

async fn relay(host: String, port: u16) -> Result<(), EnvError> {
    let (handle, addr) = start_relay(RelayConfig::default().with_host(host).with_port(port)).await?;
    info!("Relay ready on {} (Ctrl-C to stop)", addr);

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    handle.stop().await;
    Ok(())
}

async fn node(
    addr: String,
    id: Option<u32>,
    config: NodeConfig,
    seed: Option<u64>,
    log_dir: PathBuf,
) -> Result<(), EnvError> {
    let context = match seed {
        Some(seed) => TokioContext::with_seed(seed),
        None => TokioContext::new(),
    };

    let report = run_node(&addr, id.map(NodeId), config, Arc::new(context), &log_dir).await?;
    info!(
        "Node {} finished: {} ticks, {} sent, {} received, final clock {}",
        report.id, report.ticks, report.messages_sent, report.receives, report.final_clock
    );
    Ok(())
}

fn print_summary(report: &ClusterReport) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for node in &report.nodes {
        info!(
            "Node {}: {} ticks/s, {} ticks, {} sent, {} received, max queue {}, final clock {}",
            node.id,
            node.ticks_per_second,
            node.ticks,
            node.messages_sent,
            node.receives,
            node.max_queue_len,
            node.final_clock
        );
    }
    info!(
        "Total: {} sent, {} received, max clock drift {}",
        report.total_sent(),
        report.total_received(),
        report.max_clock_drift()
    );
}

async fn run(command: Command) -> Result<(), EnvError> {
    match command {
        Command::Relay { host, port } => relay(host, port).await,
        Command::Node {
            host,
            port,
            id,
            cluster_size,
            duration,
            seed,
            log_dir,
        } => {
            // The relay may assign a different id; run_node applies it
            let config = NodeConfig::new(NodeId(id.unwrap_or(0)))
                .with_cluster_size(cluster_size)
                .with_duration(duration_arg(duration)?);
            node(format!("{host}:{port}"), id, config, seed, log_dir).await
        }
        Command::Cluster {
            nodes,
            duration,
            seed,
            log_dir,
            json,
        } => {
            let mut config = ClusterConfig::default()
                .with_nodes(nodes)
                .with_duration(duration_arg(duration)?)
                .with_log_dir(log_dir);
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }

            let report = run_cluster(config).await?;
            if json {
                let out = serde_json::to_string_pretty(&report)
                    .map_err(|e| EnvError::Io(e.into()))?;
                println!("{out}");
            } else {
                print_summary(&report);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if let Err(e) = run(args.command).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
