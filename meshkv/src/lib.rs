//! # meshkv
//!
//! A small key-value store spread across a mesh of memory-isolated nodes that
//! talk only through small, unreliable messages.
//!
//! This crate provides:
//! - **Event queue**: bounded mailbox decoupling message arrival from the
//!   single deferred task that processes it
//! - **Shard store**: append-only binary log over a fixed memory region
//! - **Pending-request tracker**: reply correlation, retries and expiry
//! - **Dispatcher**: request routing through a pluggable shard selector
//! - **Relay**: stateless forwarding of shard replies
//! - **Drivers**: a deterministic seeded simulator and a tokio runtime
//!
//! ```text
//!  host ─► dispatcher ─► shard ─► [relay] ─► dispatcher ─► host
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Host-side request builder and response decoding.
pub mod client;

/// Cluster configuration and role assignment.
pub mod config;

/// Request routing and reply correlation.
pub mod dispatcher;

/// Error types.
pub mod error;

/// Per-node mailbox and role engines.
pub mod node;

/// Shard selection strategies.
pub mod placement;

/// Bounded event queue with single-drain scheduling.
pub mod queue;

/// Reply forwarding.
pub mod relay;

/// Tokio driver.
pub mod runtime;

/// Storage engine of a shard.
pub mod shard;

/// Deterministic simulation.
pub mod sim;

/// Append-only region storage.
pub mod store;

/// Outstanding-request tracking.
pub mod tracker;

/// Core identifiers and data types.
pub mod types;

/// Message schema and packet framing.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{ClientResponse, HostClient, Outcome};
pub use config::{ClusterConfig, MissPolicy, Topology, TrackerConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, KvError, StoreError};
pub use node::{build_cluster, Envelope, Event, Mailbox, Node, NodeRole, Outgoing};
pub use placement::{PlacementKind, ShardSelector};
pub use queue::{Admission, EventQueue, QueueOverflow};
pub use relay::Relay;
pub use shard::ShardEngine;
pub use store::ShardStore;
pub use tracker::{PendingRequest, PendingTracker, TrackerAction};
pub use types::{Command, Datum, Key, NodeId, RequestId, Status, TypeTag, Value};
pub use wire::{Message, WireError};
