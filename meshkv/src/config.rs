//! Cluster configuration and role assignment.
//!
//! Everything here is read once at startup and treated as read-only by the
//! nodes. [`ClusterConfig`] deserializes from JSON with every field optional:
//!
//! ```json
//! {
//!   "shards": 3,
//!   "relays": 1,
//!   "region_bytes": 4096,
//!   "placement": "least_loaded",
//!   "tracker": { "retry_interval_ms": 50, "max_retries": 3 }
//! }
//! ```
//!
//! [`Topology`] derives node ids for every role from the configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::placement::PlacementKind;
use crate::store::record::HEADER_LEN;
use crate::types::{Command, NodeId};

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What a shard does when a pull finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Answer with an explicit `NotFound` reply.
    #[default]
    Reply,
    /// Stay silent; the dispatcher eventually reports `RetryExhausted`.
    Silent,
}

/// Retry and expiry settings for the dispatcher's pending-request tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Time without a reply before a put or clear is re-sent.
    #[serde(rename = "retry_interval_ms", with = "duration_ms")]
    pub retry_interval: Duration,

    /// Extra delay added to the pull retry interval so pulls and puts
    /// dispatched together do not retry in lockstep.
    #[serde(rename = "pull_retry_offset_ms", with = "duration_ms")]
    pub pull_retry_offset: Duration,

    /// Retries allowed before the request fails with `RetryExhausted`.
    pub max_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(50),
            pull_retry_offset: Duration::from_millis(7),
            max_retries: 3,
        }
    }
}

impl TrackerConfig {
    /// Retry interval for requests of the given command.
    pub fn interval_for(&self, command: Command) -> Duration {
        match command {
            Command::Pull => self.retry_interval + self.pull_retry_offset,
            _ => self.retry_interval,
        }
    }
}

/// Startup configuration for a whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of shard nodes.
    pub shards: u16,

    /// Number of relay nodes between shards and the dispatcher (0 = direct).
    pub relays: u16,

    /// Size of each shard's storage region in bytes.
    pub region_bytes: usize,

    /// Record alignment inside regions (power of two, at least 4).
    pub alignment: usize,

    /// Capacity of every node's event queue.
    pub queue_capacity: usize,

    /// Period of the clock tick delivered to every node.
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Shard selection policy used by the dispatcher.
    pub placement: PlacementKind,

    /// Shard behaviour on a pull miss.
    pub miss_policy: MissPolicy,

    /// Dispatcher retry settings.
    pub tracker: TrackerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shards: 3,
            relays: 0,
            region_bytes: 4096,
            alignment: 4,
            queue_capacity: 64,
            tick_interval: Duration::from_millis(10),
            placement: PlacementKind::default(),
            miss_policy: MissPolicy::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` on malformed JSON, `ConfigError::Invalid` when
    /// [`validate`](Self::validate) fails.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the semantic constraints not expressible in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::Invalid("at least one shard required".into()));
        }
        if self.relays > self.shards {
            return Err(ConfigError::Invalid(format!(
                "{} relays for {} shards: a relay needs at least one shard",
                self.relays, self.shards
            )));
        }
        if !self.alignment.is_power_of_two() || self.alignment < 4 {
            return Err(ConfigError::Invalid(format!(
                "alignment {} must be a power of two >= 4",
                self.alignment
            )));
        }
        if self.region_bytes < HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "region of {} bytes cannot hold a record header",
                self.region_bytes
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity is zero".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick interval is zero".into()));
        }
        if self.tracker.retry_interval.is_zero() {
            return Err(ConfigError::Invalid("retry interval is zero".into()));
        }
        Ok(())
    }

    /// Node ids for every role.
    pub fn topology(&self) -> Topology {
        Topology::new(self.shards, self.relays)
    }
}

/// Role assignment: which node id plays which part.
///
/// - dispatcher: `0.0.0`
/// - relays: `0.1.i`
/// - shards: `1.0.i`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// The dispatcher node.
    pub dispatcher: NodeId,
    /// Relay nodes, in relay index order.
    pub relays: Vec<NodeId>,
    /// Shard nodes, in shard index order.
    pub shards: Vec<NodeId>,
}

impl Topology {
    /// Lay out `shards` shards and `relays` relays.
    pub fn new(shards: u16, relays: u16) -> Self {
        Self {
            dispatcher: NodeId::new(0, 0, 0),
            relays: (0..relays).map(|i| NodeId::new(0, 1, i)).collect(),
            shards: (0..shards).map(|i| NodeId::new(1, 0, i)).collect(),
        }
    }

    /// Relay that carries the replies of the shard at `shard_index`.
    ///
    /// Shards are split into contiguous blocks of near-equal size, one block
    /// per relay. `None` when there are no relays.
    pub fn relay_for(&self, shard_index: usize) -> Option<NodeId> {
        if self.relays.is_empty() || self.shards.is_empty() {
            return None;
        }
        let block = shard_index * self.relays.len() / self.shards.len();
        self.relays.get(block).copied()
    }

    /// Every node id in the topology.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.dispatcher)
            .chain(self.relays.iter().copied())
            .chain(self.shards.iter().copied())
    }
}
