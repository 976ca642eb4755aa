//! The dispatcher: front door of the store.
//!
//! Accepts client requests, forwards them to shards chosen by the injected
//! [`ShardSelector`], and turns shard replies into client responses. Every
//! forwarded request is tracked by a [`PendingTracker`] so lost messages are
//! retried and hopeless ones reported.
//!
//! # Routing
//!
//! | Request | Hash placement | Load-driven placement |
//! |---------|----------------|-----------------------|
//! | Put     | hashed shard   | selected shard        |
//! | Pull    | hashed shard   | every shard, first hit wins |
//! | Clear   | every shard    | every shard           |
//!
//! Client responses reuse the client's own request id and carry the time
//! elapsed since the request was first dispatched.

use std::time::Duration;

use crate::config::{ClusterConfig, Topology, TrackerConfig};
use crate::error::KvError;
use crate::node::Envelope;
use crate::placement::{LoadTable, PullRoute, ShardSelector};
use crate::store::record;
use crate::tracker::{Origin, PendingRequest, PendingTracker, Target, TrackerAction};
use crate::types::{Command, Datum, NodeId, RequestId, Status};
use crate::wire::Message;

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Client requests accepted.
    pub requests: u64,
    /// Shard replies received.
    pub replies: u64,
    /// Replies that matched no outstanding request.
    pub late_replies: u64,
    /// Client responses emitted (including failures).
    pub responses: u64,
    /// `Failure` responses emitted.
    pub failures: u64,
    /// Expirations dropped because the origin was inside the mesh.
    pub dropped_expirations: u64,
}

/// Request router and reply correlator.
#[derive(Debug)]
pub struct Dispatcher {
    node_id: NodeId,
    shards: Vec<NodeId>,
    selector: Box<dyn ShardSelector>,
    tracker: PendingTracker,
    loads: LoadTable,
    alignment: usize,
    next_id: RequestId,
    stats: DispatcherStats,
}

impl Dispatcher {
    /// Create a dispatcher over `shards`.
    pub fn new(
        node_id: NodeId,
        shards: Vec<NodeId>,
        selector: Box<dyn ShardSelector>,
        tracker: TrackerConfig,
        alignment: usize,
    ) -> Self {
        let loads = LoadTable::new(shards.len());
        Self {
            node_id,
            shards,
            selector,
            tracker: PendingTracker::new(tracker),
            loads,
            alignment,
            next_id: RequestId(1),
            stats: DispatcherStats::default(),
        }
    }

    /// Create the dispatcher described by `config`.
    pub fn from_config(config: &ClusterConfig, topology: &Topology) -> Self {
        Self::new(
            topology.dispatcher,
            topology.shards.clone(),
            config.placement.build(),
            config.tracker.clone(),
            config.alignment,
        )
    }

    /// Accept a client request and forward it.
    pub fn receive_request(&mut self, request: Message, now: Duration) -> Vec<Envelope> {
        if !request.command.is_request() {
            tracing::warn!(
                node = %self.node_id,
                command = ?request.command,
                "dispatcher expected a request"
            );
            return Vec::new();
        }
        self.stats.requests += 1;

        let origin = Origin {
            address: request.source,
            client_id: request.id,
        };
        let id = self.allocate_id();

        let target = match request.command {
            Command::Put => {
                let index = self.selector.select_put(&request.key, &self.loads);
                let Some(&shard) = self.shards.get(index) else {
                    tracing::error!(
                        index,
                        shards = self.shards.len(),
                        "selector chose a missing shard"
                    );
                    return Vec::new();
                };
                let size =
                    record::encoded_len(request.key.len(), request.value.len(), self.alignment);
                self.loads.add(index, size as u64);
                Target::Shard(shard)
            }
            Command::Pull => match self.selector.route_pull(&request.key, self.shards.len()) {
                PullRoute::Single(index) => match self.shards.get(index) {
                    Some(&shard) => Target::Shard(shard),
                    None => {
                        tracing::error!(
                            index,
                            shards = self.shards.len(),
                            "selector chose a missing shard"
                        );
                        return Vec::new();
                    }
                },
                PullRoute::Broadcast => Target::Broadcast(self.shards.clone()),
            },
            _ => {
                self.loads.reset();
                Target::Broadcast(self.shards.clone())
            }
        };

        let forwarded = Message::request(
            request.command,
            id,
            self.node_id,
            self.node_id,
            request.key,
            request.value,
        );

        tracing::debug!(
            node = %self.node_id,
            id = %id,
            client = %origin.address,
            client_id = %origin.client_id,
            command = ?forwarded.command,
            policy = self.selector.name(),
            target = ?target,
            "dispatching request"
        );

        let envelopes = addressed(&forwarded, &target.destinations());
        self.tracker.track(forwarded, origin, target, now);
        envelopes
    }

    /// Handle a shard reply, possibly completing a client request.
    pub fn receive_reply(&mut self, reply: Message, now: Duration) -> Vec<Envelope> {
        self.stats.replies += 1;

        let node_id = self.node_id;
        let pending = match self.correlate(reply.id) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(node = %node_id, from = %reply.source, error = %e, "reply dropped");
                return Vec::new();
            }
        };

        if pending.request.command.reply() != Some(reply.command) {
            tracing::warn!(
                id = %reply.id,
                expected = ?pending.request.command.reply(),
                got = ?reply.command,
                "reply command does not match request"
            );
            return Vec::new();
        }

        // A broadcast pull completes on the first hit; misses and clear acks
        // only settle the answering shard.
        let first_hit = reply.command == Command::PullReply && reply.status == Status::Ok;
        let broadcast = pending.target.is_broadcast();
        if broadcast && !first_hit && !pending.target.settle(reply.source) {
            tracing::debug!(
                id = %reply.id,
                from = %reply.source,
                status = ?reply.status,
                waiting_for = ?pending.target,
                "broadcast partially answered"
            );
            return Vec::new();
        }

        let Some(pending) = self.tracker.resolve(reply.id) else {
            return Vec::new();
        };

        if reply.status == Status::OutOfSpace {
            tracing::warn!(shard = %reply.source, id = %reply.id, "shard out of space");
        }

        let response = Message {
            command: reply.command,
            status: reply.status,
            id: pending.origin.client_id,
            source: reply.source,
            dest: pending.origin.address,
            elapsed: pending.elapsed(now),
            key: pending.request.key,
            value: reply.value,
        };
        tracing::debug!(
            id = %pending.id,
            client = %response.dest,
            status = ?response.status,
            elapsed_us = response.elapsed.as_micros() as u64,
            "request complete"
        );
        self.stats.responses += 1;
        vec![Envelope::new(response.dest, response)]
    }

    /// Periodic tick: retry quiet requests, fail exhausted ones.
    pub fn on_tick(&mut self, now: Duration) -> Vec<Envelope> {
        let mut out = Vec::new();
        for action in self.tracker.age_and_retry(now) {
            match action {
                TrackerAction::Retry {
                    id,
                    request,
                    destinations,
                    attempt,
                } => {
                    tracing::debug!(
                        node = %self.node_id,
                        id = %id,
                        attempt,
                        destinations = destinations.len(),
                        "retrying request"
                    );
                    out.extend(addressed(&request, &destinations));
                }
                TrackerAction::Expired { pending, elapsed } => {
                    if let Some(failure) = self.failure_response(pending, elapsed) {
                        out.push(failure);
                    }
                }
            }
        }
        out
    }

    fn failure_response(&mut self, pending: PendingRequest, elapsed: Duration) -> Option<Envelope> {
        if !pending.origin.address.is_host() {
            self.stats.dropped_expirations += 1;
            tracing::warn!(
                id = %pending.id,
                origin = %pending.origin.address,
                retries = pending.retry_count - 1,
                "request expired, origin is not the host; dropping"
            );
            return None;
        }

        tracing::warn!(
            id = %pending.id,
            client_id = %pending.origin.client_id,
            command = ?pending.request.command,
            elapsed_ms = elapsed.as_millis() as u64,
            "request expired, reporting failure"
        );
        self.stats.failures += 1;
        self.stats.responses += 1;
        let failure = Message {
            command: Command::Failure,
            status: Status::RetryExhausted,
            id: pending.origin.client_id,
            source: self.node_id,
            dest: pending.origin.address,
            elapsed,
            key: pending.request.key,
            value: Datum::empty(),
        };
        Some(Envelope::new(failure.dest, failure))
    }

    /// The outstanding entry a reply with `id` belongs to.
    fn correlate(&mut self, id: RequestId) -> Result<&mut PendingRequest, KvError> {
        if !self.tracker.contains(id) {
            self.tracker.note_unmatched();
            self.stats.late_replies += 1;
            return Err(KvError::DuplicateOrLateReply { id });
        }
        self.tracker
            .get_mut(id)
            .ok_or(KvError::DuplicateOrLateReply { id })
    }

    /// Next free internal id: monotonic, wrapping, skipping outstanding ids.
    fn allocate_id(&mut self) -> RequestId {
        loop {
            let id = self.next_id;
            self.next_id = id.next();
            if !self.tracker.contains(id) {
                return id;
            }
        }
    }

    /// This dispatcher's node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Shards this dispatcher routes to.
    pub fn shards(&self) -> &[NodeId] {
        &self.shards
    }

    /// Current load estimates.
    pub fn loads(&self) -> &LoadTable {
        &self.loads
    }

    /// The pending-request tracker.
    pub fn tracker(&self) -> &PendingTracker {
        &self.tracker
    }

    /// Requests still in flight.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Dispatcher counters.
    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }
}

/// One copy of `request` per destination, with `dest` filled in.
fn addressed(request: &Message, destinations: &[NodeId]) -> Vec<Envelope> {
    destinations
        .iter()
        .map(|&dest| {
            let mut message = request.clone();
            message.dest = dest;
            Envelope::new(dest, message)
        })
        .collect()
}
