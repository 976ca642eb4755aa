//! Shard engine: applies requests to the local store and answers them.

use crate::config::{ClusterConfig, MissPolicy};
use crate::error::StoreError;
use crate::node::Envelope;
use crate::store::ShardStore;
use crate::types::{Command, Datum, NodeId, Status};
use crate::wire::Message;

/// Shard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Records appended.
    pub puts: u64,
    /// Puts refused for lack of space.
    pub out_of_space: u64,
    /// Puts refused as malformed.
    pub rejected: u64,
    /// Pulls that found a record.
    pub hits: u64,
    /// Pulls that found nothing.
    pub misses: u64,
    /// Clears applied.
    pub clears: u64,
}

/// One storage node.
#[derive(Debug)]
pub struct ShardEngine {
    node_id: NodeId,
    store: ShardStore,
    relay: Option<NodeId>,
    miss_policy: MissPolicy,
    stats: ShardStats,
}

impl ShardEngine {
    /// Create a shard over `store`, replying through `relay` if given.
    pub fn new(
        node_id: NodeId,
        store: ShardStore,
        relay: Option<NodeId>,
        miss_policy: MissPolicy,
    ) -> Self {
        Self {
            node_id,
            store,
            relay,
            miss_policy,
            stats: ShardStats::default(),
        }
    }

    /// Create a shard with the configured region and miss policy.
    pub fn from_config(config: &ClusterConfig, node_id: NodeId, relay: Option<NodeId>) -> Self {
        Self::new(
            node_id,
            ShardStore::new(config.region_bytes, config.alignment),
            relay,
            config.miss_policy,
        )
    }

    /// Apply a request and build the reply, if any.
    pub fn handle(&mut self, request: Message) -> Option<Envelope> {
        let (status, value) = match request.command {
            Command::Put => (self.apply_put(&request), Datum::empty()),
            Command::Pull => match self.store.pull(&request.key) {
                Some(value) => {
                    self.stats.hits += 1;
                    (Status::Ok, value)
                }
                None => {
                    self.stats.misses += 1;
                    if self.miss_policy == MissPolicy::Silent {
                        tracing::trace!(
                            node = %self.node_id,
                            id = %request.id,
                            "pull miss, staying silent"
                        );
                        return None;
                    }
                    (Status::NotFound, Datum::empty())
                }
            },
            Command::Clear => {
                self.store.clear();
                self.stats.clears += 1;
                tracing::debug!(node = %self.node_id, id = %request.id, "store cleared");
                (Status::Ok, Datum::empty())
            }
            other => {
                tracing::warn!(
                    node = %self.node_id,
                    command = ?other,
                    "shard ignoring non-request message"
                );
                return None;
            }
        };

        let reply = request.reply(self.node_id, status, value)?;
        let next_hop = self.relay.unwrap_or(reply.dest);
        Some(Envelope::new(next_hop, reply))
    }

    fn apply_put(&mut self, request: &Message) -> Status {
        match self.store.put(&request.key, &request.value) {
            Ok(written) => {
                self.stats.puts += 1;
                tracing::debug!(
                    node = %self.node_id,
                    id = %request.id,
                    written,
                    used = self.store.used(),
                    "record stored"
                );
                Status::Ok
            }
            Err(StoreError::OutOfSpace { needed, remaining }) => {
                self.stats.out_of_space += 1;
                tracing::warn!(
                    node = %self.node_id,
                    id = %request.id,
                    needed,
                    remaining,
                    "region full"
                );
                Status::OutOfSpace
            }
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(
                    node = %self.node_id,
                    id = %request.id,
                    error = %e,
                    "record rejected"
                );
                Status::Rejected
            }
        }
    }

    /// This shard's node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The local store.
    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    /// Relay carrying this shard's replies, if any.
    pub fn relay(&self) -> Option<NodeId> {
        self.relay
    }

    /// Shard counters.
    pub fn stats(&self) -> ShardStats {
        self.stats
    }
}
