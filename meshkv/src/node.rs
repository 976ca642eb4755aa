//! Per-node context: a mailbox plus the engine of the node's role.
//!
//! Each node is split in two halves:
//!
//! - the **arrival side** ([`Mailbox`]), cloneable and cheap, used by packet
//!   reception and the periodic clock. It only enqueues;
//! - the **deferred task** ([`Node::run_deferred`]), which drains the mailbox,
//!   decodes packets, runs the role engine and returns packets to transmit.
//!
//! A driver (the simulator or the tokio runtime) schedules the deferred task
//! exactly when a push reports [`Admission::ScheduleDrain`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::ClusterConfig;
use crate::dispatcher::Dispatcher;
use crate::queue::{Admission, EventQueue, QueueOverflow};
use crate::relay::Relay;
use crate::shard::ShardEngine;
use crate::types::NodeId;
use crate::wire::{self, Message};

/// A message and the next node it must be handed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Immediate recipient (a relay, or the final destination).
    pub next_hop: NodeId,
    /// The message itself; `message.dest` is its final destination.
    pub message: Message,
}

impl Envelope {
    /// Wrap `message` for delivery to `next_hop`.
    pub fn new(next_hop: NodeId, message: Message) -> Self {
        Self { next_hop, message }
    }
}

/// An encoded packet ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Node (or [`NodeId::HOST`]) the packet is handed to.
    pub to: NodeId,
    /// Encoded packet.
    pub packet: Bytes,
}

/// What the arrival side hands to the deferred task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A raw packet from the transport.
    Packet(Bytes),
    /// A clock tick at the given time.
    Tick(Duration),
}

/// The engine a node runs.
#[derive(Debug)]
pub enum NodeRole {
    /// Front-facing request router.
    Dispatcher(Dispatcher),
    /// Storage node.
    Shard(ShardEngine),
    /// Reply forwarder.
    Relay(Relay),
}

impl NodeRole {
    /// Role name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeRole::Dispatcher(_) => "dispatcher",
            NodeRole::Shard(_) => "shard",
            NodeRole::Relay(_) => "relay",
        }
    }

    fn on_message(&mut self, message: Message, now: Duration) -> Vec<Envelope> {
        match self {
            NodeRole::Dispatcher(dispatcher) if message.command.is_request() => {
                dispatcher.receive_request(message, now)
            }
            NodeRole::Dispatcher(dispatcher) => dispatcher.receive_reply(message, now),
            NodeRole::Shard(shard) => shard.handle(message).into_iter().collect(),
            NodeRole::Relay(relay) => relay.forward(message).into_iter().collect(),
        }
    }

    fn on_tick(&mut self, now: Duration) -> Vec<Envelope> {
        match self {
            NodeRole::Dispatcher(dispatcher) => dispatcher.on_tick(now),
            NodeRole::Shard(_) | NodeRole::Relay(_) => Vec::new(),
        }
    }
}

/// Arrival-side handle of a node's mailbox.
#[derive(Debug, Clone)]
pub struct Mailbox {
    node: NodeId,
    queue: Arc<EventQueue<Event>>,
}

impl Mailbox {
    /// Enqueue a received packet.
    pub fn on_packet(&self, packet: Bytes) -> Result<Admission, QueueOverflow> {
        self.queue.push(Event::Packet(packet))
    }

    /// Enqueue a clock tick.
    pub fn on_tick(&self, now: Duration) -> Result<Admission, QueueOverflow> {
        self.queue.push(Event::Tick(now))
    }

    /// Node this mailbox belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Events dropped on a full mailbox.
    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow_count()
    }
}

/// Node counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Packets drained from the mailbox.
    pub packets: u64,
    /// Packets that failed to decode.
    pub corrupt_packets: u64,
    /// Packets addressed to another node.
    pub misrouted: u64,
    /// Ticks handled.
    pub ticks: u64,
    /// Packets emitted.
    pub sent: u64,
    /// Messages that could not be encoded.
    pub encode_failures: u64,
}

/// One node of the mesh.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    queue: Arc<EventQueue<Event>>,
    role: NodeRole,
    stats: NodeStats,
}

impl Node {
    /// Create a node with a mailbox of `queue_capacity` events.
    pub fn new(id: NodeId, role: NodeRole, queue_capacity: usize) -> Self {
        Self {
            id,
            queue: Arc::new(EventQueue::new(queue_capacity)),
            role,
            stats: NodeStats::default(),
        }
    }

    /// The arrival-side handle.
    pub fn mailbox(&self) -> Mailbox {
        Mailbox {
            node: self.id,
            queue: Arc::clone(&self.queue),
        }
    }

    /// The deferred task: drain the mailbox and return packets to transmit.
    ///
    /// `now` timestamps packet handling; ticks carry their own time.
    pub fn run_deferred(&mut self, now: Duration) -> Vec<Outgoing> {
        let queue = Arc::clone(&self.queue);
        let id = self.id;
        let role = &mut self.role;
        let stats = &mut self.stats;
        let mut envelopes = Vec::new();

        let handled = queue.drain(|event| match event {
            Event::Packet(packet) => {
                stats.packets += 1;
                let message = match wire::decode(&packet) {
                    Ok(message) => message,
                    Err(e) => {
                        stats.corrupt_packets += 1;
                        tracing::warn!(node = %id, error = %e, "dropping corrupt packet");
                        return;
                    }
                };
                if message.dest != id && !matches!(role, NodeRole::Relay(_)) {
                    stats.misrouted += 1;
                    tracing::warn!(
                        node = %id,
                        dest = %message.dest,
                        id = %message.id,
                        "misrouted packet"
                    );
                    return;
                }
                envelopes.extend(role.on_message(message, now));
            }
            Event::Tick(at) => {
                stats.ticks += 1;
                envelopes.extend(role.on_tick(at));
            }
        });

        let mut out = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            match wire::encode(&envelope.message) {
                Ok(packet) => out.push(Outgoing {
                    to: envelope.next_hop,
                    packet,
                }),
                Err(e) => {
                    self.stats.encode_failures += 1;
                    tracing::warn!(
                        node = %self.id,
                        error = %e,
                        id = %envelope.message.id,
                        "cannot encode message"
                    );
                }
            }
        }
        self.stats.sent += out.len() as u64;

        if handled > 0 {
            tracing::trace!(
                node = %self.id,
                role = self.role.name(),
                handled,
                sent = out.len(),
                "deferred run"
            );
        }
        out
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The role engine.
    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    /// The dispatcher engine, if this node is the dispatcher.
    pub fn as_dispatcher(&self) -> Option<&Dispatcher> {
        match &self.role {
            NodeRole::Dispatcher(dispatcher) => Some(dispatcher),
            _ => None,
        }
    }

    /// The shard engine, if this node is a shard.
    pub fn as_shard(&self) -> Option<&ShardEngine> {
        match &self.role {
            NodeRole::Shard(shard) => Some(shard),
            _ => None,
        }
    }

    /// The relay engine, if this node is a relay.
    pub fn as_relay(&self) -> Option<&Relay> {
        match &self.role {
            NodeRole::Relay(relay) => Some(relay),
            _ => None,
        }
    }

    /// The node's mailbox.
    pub fn queue(&self) -> &EventQueue<Event> {
        &self.queue
    }

    /// Node counters.
    pub fn stats(&self) -> NodeStats {
        self.stats
    }
}

/// Build every node of the cluster described by `config`: the dispatcher
/// first, then relays, then shards.
pub fn build_cluster(config: &ClusterConfig) -> Vec<Node> {
    let topology = config.topology();
    let capacity = config.queue_capacity;

    let mut nodes = Vec::with_capacity(1 + topology.relays.len() + topology.shards.len());
    nodes.push(Node::new(
        topology.dispatcher,
        NodeRole::Dispatcher(Dispatcher::from_config(config, &topology)),
        capacity,
    ));
    for &relay in &topology.relays {
        let engine = Relay::new(relay);
        nodes.push(Node::new(relay, NodeRole::Relay(engine), capacity));
    }
    for (index, &shard) in topology.shards.iter().enumerate() {
        let engine = ShardEngine::from_config(config, shard, topology.relay_for(index));
        nodes.push(Node::new(shard, NodeRole::Shard(engine), capacity));
    }

    tracing::info!(
        shards = topology.shards.len(),
        relays = topology.relays.len(),
        placement = ?config.placement,
        "cluster built"
    );
    nodes
}
