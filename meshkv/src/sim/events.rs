use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use bytes::Bytes;

use crate::types::NodeId;

/// Events that can be scheduled in the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A packet reaches its next hop.
    Deliver {
        /// Receiving node, or [`NodeId::HOST`].
        to: NodeId,
        /// The packet bytes.
        packet: Bytes,
    },

    /// Run a node's deferred task.
    RunDeferred {
        /// The node to run.
        node: NodeId,
    },

    /// Periodic clock tick delivered to every node. Reschedules itself.
    Tick,
}

impl SimEvent {
    /// Whether this event only keeps the clock going.
    ///
    /// A simulation whose heap holds nothing else has no work in flight.
    pub fn is_infrastructure_event(&self) -> bool {
        matches!(self, SimEvent::Tick)
    }
}

/// A [`SimEvent`] stamped with its firing time.
///
/// Ordered by `(time, sequence)`; the sequence number is the scheduling
/// order, so two events due at the same instant fire in the order they were
/// scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    time: Duration,
    sequence: u64,
    event: SimEvent,
}

impl ScheduledEvent {
    /// Stamp `event` to fire at `time`; `sequence` breaks ties.
    pub fn new(time: Duration, event: SimEvent, sequence: u64) -> Self {
        Self {
            time,
            sequence,
            event,
        }
    }

    /// Firing time.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// The stamped event.
    pub fn event(&self) -> &SimEvent {
        &self.event
    }

    /// Unwrap the event.
    pub fn into_event(self) -> SimEvent {
        self.event
    }

    fn key(&self) -> (Duration, u64) {
        (self.time, self.sequence)
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending events, earliest first.
#[derive(Debug, Default)]
pub struct EventHeap {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
}

impl EventHeap {
    /// An empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.heap.push(Reverse(event));
    }

    /// Take the next event to fire.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop().map(|Reverse(event)| event)
    }

    /// The next event to fire, left in place.
    pub fn peek_earliest(&self) -> Option<&ScheduledEvent> {
        self.heap.peek().map(|Reverse(event)| event)
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of scheduled events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether every scheduled event is a clock tick.
    pub fn has_only_infrastructure_events(&self) -> bool {
        self.heap
            .iter()
            .all(|Reverse(e)| e.event().is_infrastructure_event())
    }
}
