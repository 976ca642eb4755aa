//! Deterministic discrete-event driver for a whole cluster.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::client::{ClientResponse, HostClient, Outcome};
use crate::config::{ClusterConfig, Topology};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, KvError};
use crate::node::{build_cluster, Mailbox, Node, Outgoing};
use crate::queue::{Admission, QueueOverflow};
use crate::shard::ShardEngine;
use crate::types::{Datum, NodeId, RequestId};
use crate::wire::{self, Message};

use super::config::ChaosConfig;
use super::events::{EventHeap, ScheduledEvent, SimEvent};
use super::report::SimulationReport;

/// A whole cluster running on a virtual clock over a lossy, unordered mesh.
///
/// Everything random (latency, loss, bit flips) comes from one `ChaCha8Rng`
/// seeded at construction, so a seed fully determines a run.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use meshkv::sim::{ChaosConfig, SimCluster};
/// use meshkv::client::Outcome;
/// use meshkv::{ClusterConfig, Datum};
///
/// let mut sim = SimCluster::new(ClusterConfig::default(), ChaosConfig::fast_local(), 7)
///     .expect("valid config");
/// sim.put("k", "v");
/// sim.pull("k");
/// assert!(sim.run_until_quiescent(Duration::from_secs(1)));
///
/// let responses = sim.take_responses();
/// assert_eq!(responses.len(), 2);
/// assert_eq!(responses[1].outcome, Outcome::Found(Datum::text("v")));
/// ```
#[derive(Debug)]
pub struct SimCluster {
    config: ClusterConfig,
    chaos: ChaosConfig,
    topology: Topology,
    nodes: BTreeMap<NodeId, Node>,
    mailboxes: BTreeMap<NodeId, Mailbox>,
    events: EventHeap,
    sequence: u64,
    now: Duration,
    rng: ChaCha8Rng,
    partitioned: BTreeSet<NodeId>,
    client: HostClient,
    inbox: VecDeque<ClientResponse>,
    report: SimulationReport,
}

impl SimCluster {
    /// Build and start the cluster described by `config`.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if either configuration fails validation.
    pub fn new(config: ClusterConfig, chaos: ChaosConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        chaos.validate()?;

        let topology = config.topology();
        let nodes: BTreeMap<_, _> = build_cluster(&config)
            .into_iter()
            .map(|node| (node.id(), node))
            .collect();
        let mailboxes = nodes
            .iter()
            .map(|(id, node)| (*id, node.mailbox()))
            .collect();

        tracing::info!(seed, nodes = nodes.len(), ?chaos, "simulation starting");

        let mut sim = Self {
            client: HostClient::new(topology.dispatcher),
            config,
            chaos,
            topology,
            nodes,
            mailboxes,
            events: EventHeap::new(),
            sequence: 0,
            now: Duration::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            partitioned: BTreeSet::new(),
            inbox: VecDeque::new(),
            report: SimulationReport {
                seed,
                ..SimulationReport::default()
            },
        };
        let first_tick = sim.config.tick_interval;
        sim.schedule(first_tick, SimEvent::Tick);
        Ok(sim)
    }

    /// Send a request from the host to the dispatcher.
    pub fn submit(&mut self, request: Message) -> RequestId {
        let id = request.id;
        match wire::encode(&request) {
            Ok(packet) => {
                let latency = self.sample_latency();
                self.schedule(
                    self.now + latency,
                    SimEvent::Deliver {
                        to: self.topology.dispatcher,
                        packet,
                    },
                );
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "host request not encodable"),
        }
        id
    }

    /// Submit a `Put` built by the host client.
    pub fn put(&mut self, key: impl Into<Datum>, value: impl Into<Datum>) -> RequestId {
        let request = self.client.put(key, value);
        self.submit(request)
    }

    /// Submit a `Pull` built by the host client.
    pub fn pull(&mut self, key: impl Into<Datum>) -> RequestId {
        let request = self.client.pull(key);
        self.submit(request)
    }

    /// Submit a `Clear` built by the host client.
    pub fn clear(&mut self) -> RequestId {
        let request = self.client.clear();
        self.submit(request)
    }

    /// Cut a node off the mesh: it neither sends nor receives.
    pub fn partition(&mut self, node: NodeId) {
        tracing::info!(node = %node, "partitioning node");
        self.partitioned.insert(node);
    }

    /// Reconnect a partitioned node.
    pub fn heal(&mut self, node: NodeId) {
        tracing::info!(node = %node, "healing node");
        self.partitioned.remove(&node);
    }

    /// Process events up to and including `deadline`, then set the clock to it.
    pub fn run_until(&mut self, deadline: Duration) {
        while self
            .events
            .peek_earliest()
            .is_some_and(|next| next.time() <= deadline)
        {
            self.step();
        }
        self.now = self.now.max(deadline);
        self.report.simulated_time = self.now;
    }

    /// Run until no work is in flight and the dispatcher has nothing
    /// outstanding, or until `limit` of simulated time has passed.
    ///
    /// Returns `true` on quiescence.
    pub fn run_until_quiescent(&mut self, limit: Duration) -> bool {
        let deadline = self.now + limit;
        loop {
            if self.is_quiescent() {
                self.report.simulated_time = self.now;
                return true;
            }
            match self.events.peek_earliest() {
                Some(next) if next.time() <= deadline => {
                    self.step();
                }
                _ => {
                    tracing::warn!(now = ?self.now, "simulation not quiescent at deadline");
                    self.run_until(deadline);
                    return false;
                }
            }
        }
    }

    /// Whether nothing but clock ticks is scheduled and nothing is outstanding.
    pub fn is_quiescent(&self) -> bool {
        self.events.has_only_infrastructure_events()
            && self.dispatcher().map_or(true, |d| d.outstanding() == 0)
    }

    /// Process the earliest event. Returns `false` if none is scheduled.
    pub fn step(&mut self) -> bool {
        let Some(scheduled) = self.events.pop_earliest() else {
            return false;
        };
        self.now = scheduled.time();
        self.report.events_processed += 1;

        match scheduled.into_event() {
            SimEvent::Deliver { to, packet } => self.deliver(to, packet),
            SimEvent::RunDeferred { node } => self.run_deferred(node),
            SimEvent::Tick => {
                let ids: Vec<_> = self.mailboxes.keys().copied().collect();
                for id in ids {
                    let admission = self.mailboxes.get(&id).map(|m| m.on_tick(self.now));
                    self.admit(id, admission);
                }
                let next = self.now + self.config.tick_interval;
                self.schedule(next, SimEvent::Tick);
            }
        }
        true
    }

    fn deliver(&mut self, to: NodeId, packet: Bytes) {
        if to.is_host() {
            match wire::decode(&packet).map(ClientResponse::from_message) {
                Ok(Some(response)) => {
                    self.report.responses += 1;
                    if response.outcome == Outcome::RetryExhausted {
                        self.report.failures += 1;
                    }
                    tracing::debug!(
                        id = %response.id,
                        outcome = ?response.outcome,
                        "host received response"
                    );
                    self.inbox.push_back(response);
                }
                Ok(None) => tracing::warn!("host received a non-response"),
                Err(e) => tracing::warn!(error = %e, "host received a corrupt packet"),
            }
            return;
        }

        let admission = self.mailboxes.get(&to).map(|m| m.on_packet(packet));
        if admission.is_none() {
            tracing::warn!(to = %to, "packet for unknown node");
        }
        self.admit(to, admission);
    }

    fn admit(&mut self, node: NodeId, admission: Option<Result<Admission, QueueOverflow>>) {
        match admission {
            Some(Ok(Admission::ScheduleDrain)) => {
                self.schedule(self.now, SimEvent::RunDeferred { node })
            }
            Some(Ok(Admission::Coalesced)) | None => {}
            Some(Err(overflow)) => {
                self.report.queue_overflows += 1;
                tracing::debug!(node = %node, error = %KvError::from(overflow), "event dropped");
            }
        }
    }

    fn run_deferred(&mut self, id: NodeId) {
        let now = self.now;
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        for outgoing in node.run_deferred(now) {
            self.transmit(id, outgoing);
        }
    }

    fn transmit(&mut self, from: NodeId, outgoing: Outgoing) {
        let Outgoing { to, mut packet } = outgoing;
        self.report.packets_sent += 1;

        if !to.is_host() {
            if self.partitioned.contains(&from) || self.partitioned.contains(&to) {
                self.report.packets_partitioned += 1;
                tracing::trace!(from = %from, to = %to, "packet lost to partition");
                return;
            }
            let drop = self.chaos.drop_probability;
            if drop > 0.0 && self.rng.random_bool(drop) {
                self.report.packets_dropped += 1;
                tracing::trace!(from = %from, to = %to, "packet dropped");
                return;
            }
            if self.chaos.corrupt_probability > 0.0
                && !packet.is_empty()
                && self.rng.random_bool(self.chaos.corrupt_probability)
            {
                let mut bytes = packet.to_vec();
                let bit = self.rng.random_range(0..bytes.len() * 8);
                bytes[bit / 8] ^= 1 << (bit % 8);
                packet = Bytes::from(bytes);
                self.report.packets_corrupted += 1;
            }
        }

        let latency = self.sample_latency();
        self.schedule(self.now + latency, SimEvent::Deliver { to, packet });
    }

    fn sample_latency(&mut self) -> Duration {
        let min = self.chaos.latency.start().as_micros() as u64;
        let max = self.chaos.latency.end().as_micros() as u64;
        if min >= max {
            return Duration::from_micros(min);
        }
        Duration::from_micros(self.rng.random_range(min..=max))
    }

    fn schedule(&mut self, time: Duration, event: SimEvent) {
        let scheduled = ScheduledEvent::new(time, event, self.sequence);
        self.events.schedule(scheduled);
        self.sequence += 1;
    }

    /// Take every response the host has received so far, in arrival order.
    pub fn take_responses(&mut self) -> Vec<ClientResponse> {
        self.inbox.drain(..).collect()
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Role assignment of the cluster.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// The dispatcher engine.
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.nodes.get(&self.topology.dispatcher)?.as_dispatcher()
    }

    /// The shard engine at `index`.
    pub fn shard(&self, index: usize) -> Option<&ShardEngine> {
        let id = self.topology.shards.get(index)?;
        self.nodes.get(id)?.as_shard()
    }

    /// Counters so far.
    pub fn report(&self) -> SimulationReport {
        let mut report = self.report.clone();
        report.simulated_time = self.now;
        report
    }
}
