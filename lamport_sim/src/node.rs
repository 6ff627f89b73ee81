//! VirtualMachine - the per-node event loop.
//!
//! Each tick a node does exactly one thing:
//!
//! ```text
//!            ┌──────────── inbox non-empty? ────────────┐
//!            │ yes                                      │ no
//!            ▼                                          ▼
//!   pop one, advance(msg.t)                     r = roll(1, event_range)
//!   RECEIVE FROM: s QUEUE SIZE: n       1,2 → send to peer(r)
//!                                       3   → send to peer(1) and peer(2)
//!                                       else→ internal
//!                                       then tick() once
//! ```
//!
//! and then appends `<event>\t<timestamp>\t<clock>` to its event log and
//! sleeps `1s / ticks_per_second`. Receiving always wins over generating new
//! work, so a node with pending input never originates an event in the same
//! tick.

use crate::event_log::{format_record, EventLog};

use lamport_env::{
    EnvError, InboundQueue, LogicalClock, Message, NodeContext, NodeId, Outbound,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for a single node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id within the cluster
    pub id: NodeId,

    /// Number of nodes in the cluster (recipient ids wrap modulo this)
    pub cluster_size: u32,

    /// Wall-clock (or virtual) length of the run
    pub run_duration: Duration,

    /// Upper bound of the tick-rate draw, `ticks_per_second ∈ [1, max]`
    pub max_ticks_per_second: u32,

    /// Upper bound of the per-tick action draw, `r ∈ [1, event_range]`
    pub event_range: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: NodeId(0),
            cluster_size: 3,
            run_duration: Duration::from_secs(60),
            max_ticks_per_second: 6,
            event_range: 10,
        }
    }
}

impl NodeConfig {
    /// Creates a config for `id` with default settings.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Sets the cluster size.
    pub fn with_cluster_size(mut self, size: u32) -> Self {
        self.cluster_size = size;
        self
    }

    /// Sets the run duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.run_duration = duration;
        self
    }

    /// Sets the upper bound of the tick-rate draw.
    pub fn with_max_ticks_per_second(mut self, max: u32) -> Self {
        self.max_ticks_per_second = max;
        self
    }

    /// Sets the upper bound of the action draw.
    pub fn with_event_range(mut self, range: u32) -> Self {
        self.event_range = range;
        self
    }

    /// Checks the ranges the event loop relies on.
    pub fn validate(&self) -> Result<(), EnvError> {
        if self.cluster_size < 3 {
            return Err(EnvError::config(format!(
                "cluster size must be at least 3, got {}",
                self.cluster_size
            )));
        }
        if self.id.index() >= self.cluster_size {
            return Err(EnvError::config(format!(
                "node id {} outside cluster of {}",
                self.id, self.cluster_size
            )));
        }
        if self.max_ticks_per_second == 0 {
            return Err(EnvError::config("max ticks per second must be at least 1"));
        }
        if self.event_range == 0 {
            return Err(EnvError::config("event range must be at least 1"));
        }
        Ok(())
    }
}

/// What a node did during one tick (or at startup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Tick rate chosen at construction
    Startup { ticks_per_second: u32 },

    /// One message applied from the inbox
    Receive { from: NodeId, queue_len: usize },

    /// One message sent
    Send { to: NodeId },

    /// Two messages sent, in this order
    SendPair { first: NodeId, second: NodeId },

    /// No communication
    Internal,
}

impl std::fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeEvent::Startup { ticks_per_second } => write!(f, "TICKS={ticks_per_second}"),
            NodeEvent::Receive { from, queue_len } => {
                write!(f, "RECEIVE FROM: {from} QUEUE SIZE: {queue_len}")
            }
            NodeEvent::Send { to } => write!(f, "SEND TO: {to}"),
            NodeEvent::SendPair { first, second } => write!(f, "SEND TO: {first} AND {second}"),
            NodeEvent::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Summary of one node's run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub id: u32,
    pub ticks_per_second: u32,
    pub ticks: u64,
    pub receives: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub internal_events: u64,
    pub max_queue_len: usize,
    pub discarded_on_stop: usize,
    pub final_clock: u64,
}

/// A simulated machine with a Lamport clock.
///
/// Generic over the context, transport and log sink, so the same loop runs
/// over TCP against the wall clock or in memory against a virtual clock.
pub struct VirtualMachine<Ctx, Out, Log>
where
    Ctx: NodeContext,
    Out: Outbound,
    Log: EventLog,
{
    config: NodeConfig,
    ticks_per_second: u32,
    clock: LogicalClock,
    inbox: InboundQueue,
    context: Arc<Ctx>,
    outbound: Arc<Out>,
    log: Log,
    report: NodeReport,
}

impl<Ctx, Out, Log> VirtualMachine<Ctx, Out, Log>
where
    Ctx: NodeContext,
    Out: Outbound,
    Log: EventLog,
{
    /// Creates a node, draws its tick rate and logs the `TICKS=` record.
    ///
    /// `inbox` is the queue its receiver (or a `SimNetwork`) feeds.
    pub fn new(
        config: NodeConfig,
        context: Arc<Ctx>,
        outbound: Arc<Out>,
        inbox: InboundQueue,
        log: Log,
    ) -> Result<Self, EnvError> {
        config.validate()?;

        let ticks_per_second = context.roll(1, config.max_ticks_per_second);
        let report = NodeReport {
            id: config.id.index(),
            ticks_per_second,
            ..Default::default()
        };

        let mut node = Self {
            config,
            ticks_per_second,
            clock: LogicalClock::new(),
            inbox,
            context,
            outbound,
            log,
            report,
        };
        node.record(&NodeEvent::Startup { ticks_per_second });
        Ok(node)
    }

    /// Replaces the clock, e.g. to resume from a known value.
    pub fn with_clock(mut self, clock: LogicalClock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns this node's id.
    pub fn id(&self) -> NodeId {
        self.config.id
    }

    /// Returns the current clock value.
    pub fn clock(&self) -> u64 {
        self.clock.value()
    }

    /// Returns the tick rate drawn at construction.
    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// Delay between ticks: `1s / ticks_per_second`.
    pub fn tick_delay(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second
    }

    /// Returns the inbox handle.
    pub fn inbox(&self) -> &InboundQueue {
        &self.inbox
    }

    /// Returns the counters gathered so far.
    pub fn report(&self) -> NodeReport {
        NodeReport {
            final_clock: self.clock.value(),
            ..self.report.clone()
        }
    }

    /// Recipient for draw `r`: `(id - r) mod cluster_size`.
    pub fn recipient(&self, r: u32) -> NodeId {
        self.config.id.peer(r, self.config.cluster_size)
    }

    /// Performs one tick without sleeping and returns what happened.
    pub async fn step(&mut self) -> NodeEvent {
        self.report.ticks += 1;

        let event = match self.inbox.pop() {
            Some((message, queue_len)) => {
                self.report.max_queue_len = self.report.max_queue_len.max(queue_len + 1);
                self.report.receives += 1;
                self.clock.advance(message.logical_time);
                NodeEvent::Receive {
                    from: message.sender,
                    queue_len,
                }
            }
            None => self.originate().await,
        };

        debug!(node = %self.config.id, clock = self.clock.value(), "{}", event);
        self.record(&event);
        event
    }

    /// Runs ticks until the configured duration elapses or `shutdown` fires,
    /// then cancels `shutdown` (stopping the receiver), closes the outbound
    /// link and discards anything still queued.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> NodeReport {
        let deadline = self.context.now() + self.config.run_duration;
        let delay = self.tick_delay();

        info!(
            node = %self.config.id,
            ticks_per_second = self.ticks_per_second,
            seed = self.context.seed(),
            "Running VM for {:?}",
            self.config.run_duration
        );

        while !shutdown.is_cancelled() && self.context.now() < deadline {
            self.step().await;

            tokio::select! {
                _ = self.context.sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        shutdown.cancel();
        self.outbound.close().await;
        self.report.discarded_on_stop = self.inbox.clear();

        let report = self.report();
        info!(
            node = %self.config.id,
            ticks = report.ticks,
            final_clock = report.final_clock,
            "VM done"
        );
        report
    }

    /// Draws an action for a tick with an empty inbox. All sends carry the
    /// clock value from before this tick's single local advance.
    async fn originate(&mut self) -> NodeEvent {
        let r = self.context.roll(1, self.config.event_range);
        let event = match r {
            1 | 2 => {
                let to = self.recipient(r);
                self.send_to(to).await;
                NodeEvent::Send { to }
            }
            3 => {
                let first = self.recipient(1);
                let second = self.recipient(2);
                self.send_to(first).await;
                self.send_to(second).await;
                NodeEvent::SendPair { first, second }
            }
            _ => {
                self.report.internal_events += 1;
                NodeEvent::Internal
            }
        };
        self.clock.tick();
        event
    }

    async fn send_to(&mut self, recipient: NodeId) {
        let message = Message::new(self.config.id, recipient, self.clock.value());
        match self.outbound.send(message).await {
            Ok(()) => self.report.messages_sent += 1,
            Err(e) => {
                self.report.send_failures += 1;
                warn!(node = %self.config.id, %recipient, "Send failed: {}", e);
            }
        }
    }

    fn record(&mut self, event: &NodeEvent) {
        let line = format_record(
            &event.to_string(),
            self.context.timestamp_nanos(),
            self.clock.value(),
        );
        if let Err(e) = self.log.append(&line) {
            warn!(node = %self.config.id, "Failed to write event log: {}", e);
        }
    }
}
