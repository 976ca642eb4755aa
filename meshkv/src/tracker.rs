//! Pending-request tracking for the dispatcher.
//!
//! Every request the dispatcher forwards to a shard is tracked here until a
//! matching reply arrives or its retries run out.
//!
//! # Lifecycle
//!
//! ```text
//!   track() ──► Sent ──► resolve() ──► Replied
//!                 │
//!                 └─ age_and_retry() ──► Retried ──► ... ──► Expired
//! ```
//!
//! Entries are kept in a small deque: insertion at the head is O(1), lookups
//! are linear. The dispatcher only ever has a handful of requests in flight.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::types::{NodeId, RequestId};
use crate::wire::Message;

/// Shards a tracked request was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One shard owns the request.
    Shard(NodeId),
    /// Broadcast request; holds the shards that have not answered yet.
    Broadcast(Vec<NodeId>),
}

impl Target {
    /// Where a (re)transmission must go.
    pub fn destinations(&self) -> Vec<NodeId> {
        match self {
            Target::Shard(shard) => vec![*shard],
            Target::Broadcast(remaining) => remaining.clone(),
        }
    }

    /// Record an answer from `shard`; `true` once nothing is left to wait for.
    ///
    /// A single-shard target settles on any answer.
    pub fn settle(&mut self, shard: NodeId) -> bool {
        match self {
            Target::Shard(_) => true,
            Target::Broadcast(remaining) => {
                remaining.retain(|s| *s != shard);
                remaining.is_empty()
            }
        }
    }

    /// Whether the request went to more than one shard.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::Broadcast(_))
    }
}

/// Who asked, and under which id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    /// Address responses go back to.
    pub address: NodeId,
    /// The client's own request id, echoed in the response.
    pub client_id: RequestId,
}

/// A request waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Dispatcher-assigned id, carried by the forwarded request and its replies.
    pub id: RequestId,
    /// Snapshot of the forwarded request, re-sent on retry.
    pub request: Message,
    /// Client that issued the request.
    pub origin: Origin,
    /// Shards still expected to answer.
    pub target: Target,
    /// Time of the first transmission.
    pub dispatched_at: Duration,
    /// Time of the latest transmission.
    pub last_sent: Duration,
    /// Retransmissions so far.
    pub retry_count: u32,
}

impl PendingRequest {
    /// Time since first dispatch.
    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.dispatched_at)
    }
}

/// What the dispatcher must do after a tracker tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerAction {
    /// Re-send the request snapshot.
    Retry {
        /// Tracked id.
        id: RequestId,
        /// Request snapshot to re-send.
        request: Message,
        /// Shards to re-send to.
        destinations: Vec<NodeId>,
        /// Retry number, starting at 1.
        attempt: u32,
    },
    /// The request ran out of retries and was removed.
    Expired {
        /// The removed entry.
        pending: PendingRequest,
        /// Time between first dispatch and giving up.
        elapsed: Duration,
    },
}

/// Tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Requests tracked.
    pub tracked: u64,
    /// Requests resolved by a reply.
    pub resolved: u64,
    /// Resolve calls that matched nothing.
    pub unmatched: u64,
    /// Retransmissions ordered.
    pub retries: u64,
    /// Requests expired.
    pub expired: u64,
}

/// Outstanding requests of one dispatcher.
#[derive(Debug)]
pub struct PendingTracker {
    entries: VecDeque<PendingRequest>,
    config: TrackerConfig,
    stats: TrackerStats,
}

impl PendingTracker {
    /// Create an empty tracker.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            config,
            stats: TrackerStats::default(),
        }
    }

    /// Start tracking a request just sent at `now`.
    ///
    /// The request's `id` is the tracking key and must not be outstanding;
    /// the dispatcher's id allocator guarantees it. Insertion is at the head.
    pub fn track(&mut self, request: Message, origin: Origin, target: Target, now: Duration) {
        debug_assert!(
            !self.contains(request.id),
            "request id {} already outstanding",
            request.id
        );
        self.entries.push_front(PendingRequest {
            id: request.id,
            request,
            origin,
            target,
            dispatched_at: now,
            last_sent: now,
            retry_count: 0,
        });
        self.stats.tracked += 1;
    }

    /// Remove and return the entry for `id`.
    ///
    /// `None` for an id that is not outstanding: a late, duplicated or
    /// unsolicited reply.
    pub fn resolve(&mut self, id: RequestId) -> Option<PendingRequest> {
        match self.entries.iter().position(|p| p.id == id) {
            Some(index) => {
                self.stats.resolved += 1;
                self.entries.remove(index)
            }
            None => {
                self.stats.unmatched += 1;
                None
            }
        }
    }

    /// Mutable access to an outstanding entry.
    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut PendingRequest> {
        self.entries.iter_mut().find(|p| p.id == id)
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.iter().any(|p| p.id == id)
    }

    /// Count a reply that matched nothing without going through `resolve`.
    pub fn note_unmatched(&mut self) {
        self.stats.unmatched += 1;
    }

    /// Age every entry at time `now`.
    ///
    /// An entry whose last transmission is at least its retry interval old has
    /// its retry count bumped. Past `max_retries` it is removed and reported
    /// as [`TrackerAction::Expired`]; otherwise a [`TrackerAction::Retry`] is
    /// emitted and its send time reset.
    pub fn age_and_retry(&mut self, now: Duration) -> Vec<TrackerAction> {
        let config = &self.config;
        let stats = &mut self.stats;
        let mut actions = Vec::new();

        self.entries.retain_mut(|pending| {
            let interval = config.interval_for(pending.request.command);
            if now.saturating_sub(pending.last_sent) < interval {
                return true;
            }

            pending.retry_count += 1;
            if pending.retry_count > config.max_retries {
                stats.expired += 1;
                actions.push(TrackerAction::Expired {
                    pending: pending.clone(),
                    elapsed: pending.elapsed(now),
                });
                return false;
            }

            pending.last_sent = now;
            stats.retries += 1;
            actions.push(TrackerAction::Retry {
                id: pending.id,
                request: pending.request.clone(),
                destinations: pending.target.destinations(),
                attempt: pending.retry_count,
            });
            true
        });

        actions
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracker counters.
    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// The retry settings in use.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}
