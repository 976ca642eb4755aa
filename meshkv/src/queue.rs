//! EventQueue: bounded mailbox between arrival callbacks and the deferred task.
//!
//! Every node receives messages through one of these. The arrival side
//! (message reception, periodic clock) only pushes; the deferred task is the
//! only consumer and drains the queue to completion.
//!
//! # Design
//!
//! - Storage is a bounded lock-free ring ([`crossbeam::queue::ArrayQueue`]),
//!   so a push never blocks and never observes a half-updated index.
//! - A `run_pending` flag records that a drain is scheduled or running. The
//!   push that flips it from `false` to `true` is told to schedule the drain
//!   ([`Admission::ScheduleDrain`]); every other push is coalesced.
//! - A full queue drops the new event and bumps the overflow counter. Events
//!   already queued are untouched.
//!
//! ```text
//!  arrival callback                      deferred task
//!  ────────────────                      ─────────────
//!  push(ev) ──► [ ring buffer ] ──► drain(handler)
//!      │                                   │
//!      └── run_pending: false→true ──► schedule exactly one drain
//!                                          └── clear run_pending when empty
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::error::KvError;

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This push armed the run-pending flag: the caller must schedule one drain.
    ScheduleDrain,
    /// A drain is already pending or running and will pick the event up.
    Coalesced,
}

/// The queue was full and the event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOverflow {
    /// Capacity of the queue.
    pub capacity: usize,
}

impl From<QueueOverflow> for KvError {
    fn from(overflow: QueueOverflow) -> Self {
        KvError::QueueOverflow {
            capacity: overflow.capacity,
        }
    }
}

/// Bounded FIFO of opaque events with single-drain scheduling.
///
/// `push`/`enqueue` may be called from the arrival context at any time,
/// including while `drain` is running. `drain` must only be called by the
/// node's scheduler; a re-entrant call is refused.
pub struct EventQueue<T> {
    ring: ArrayQueue<T>,
    run_pending: AtomicBool,
    draining: AtomicBool,
    overflow: AtomicU64,
    enqueued: AtomicU64,
    drained: AtomicU64,
}

impl<T> EventQueue<T> {
    /// Create a queue holding at most `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (configuration validation rejects it first).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity),
            run_pending: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            overflow: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    /// Push an event, reporting whether a drain must be scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueOverflow`] if the queue is full. The event is dropped and
    /// the overflow counter incremented; nothing else changes.
    pub fn push(&self, event: T) -> Result<Admission, QueueOverflow> {
        if self.ring.push(event).is_err() {
            self.overflow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                capacity = self.ring.capacity(),
                overflow = self.overflow.load(Ordering::Relaxed),
                "event queue full, dropping event"
            );
            return Err(QueueOverflow {
                capacity: self.ring.capacity(),
            });
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);

        if self.run_pending.swap(true, Ordering::AcqRel) {
            Ok(Admission::Coalesced)
        } else {
            Ok(Admission::ScheduleDrain)
        }
    }

    /// Push an event; `false` if it was dropped because the queue is full.
    pub fn enqueue(&self, event: T) -> bool {
        self.push(event).is_ok()
    }

    /// Pop and handle events until the queue is empty, then clear the
    /// run-pending flag.
    ///
    /// If an event lands between the last pop and the flag clear, its push saw
    /// the flag still set and did not schedule anything, so the drain claims
    /// the flag back and keeps going.
    ///
    /// Returns the number of events handled. A re-entrant call returns 0.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        if self.draining.swap(true, Ordering::Acquire) {
            tracing::error!("re-entrant drain refused");
            return 0;
        }

        let mut handled = 0;
        loop {
            while let Some(event) = self.ring.pop() {
                handler(event);
                handled += 1;
            }

            self.run_pending.store(false, Ordering::Release);
            if self.ring.is_empty() || self.run_pending.swap(true, Ordering::AcqRel) {
                break;
            }
        }

        self.drained.fetch_add(handled as u64, Ordering::Relaxed);
        self.draining.store(false, Ordering::Release);
        handled
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Maximum number of queued events.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Whether a drain is scheduled or running.
    pub fn is_run_pending(&self) -> bool {
        self.run_pending.load(Ordering::Acquire)
    }

    /// Events dropped because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Events accepted since creation.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Events handed to drain handlers since creation.
    pub fn drained_count(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("run_pending", &self.is_run_pending())
            .field("overflow", &self.overflow_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_push_schedules_drain() {
        let queue = EventQueue::new(4);
        assert_eq!(queue.push(1), Ok(Admission::ScheduleDrain));
        assert_eq!(queue.push(2), Ok(Admission::Coalesced));
        assert_eq!(queue.push(3), Ok(Admission::Coalesced));
        assert!(queue.is_run_pending());
    }

    #[test]
    fn test_drain_empties_in_fifo_order_and_clears_flag() {
        let queue = EventQueue::new(8);
        for i in 0..5 {
            assert!(queue.enqueue(i));
        }

        let mut seen = Vec::new();
        let handled = queue.drain(|ev| seen.push(ev));

        assert_eq!(handled, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert!(!queue.is_run_pending());
        assert_eq!(queue.drained_count(), 5);

        // The next push after an empty drain schedules again
        assert_eq!(queue.push(9), Ok(Admission::ScheduleDrain));
    }

    #[test]
    fn test_overflow_preserves_queued_events() {
        let queue = EventQueue::new(3);
        assert!(queue.enqueue("a"));
        assert!(queue.enqueue("b"));
        assert!(queue.enqueue("c"));

        assert!(!queue.enqueue("d"));
        assert_eq!(queue.push("e"), Err(QueueOverflow { capacity: 3 }));
        assert_eq!(queue.overflow_count(), 2);
        assert_eq!(queue.enqueued_count(), 3);

        let mut seen = Vec::new();
        queue.drain(|ev| seen.push(ev));
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_events_pushed_during_drain_are_handled_in_same_drain() {
        let queue = EventQueue::new(8);
        assert_eq!(queue.push(0u32), Ok(Admission::ScheduleDrain));

        let mut seen = Vec::new();
        queue.drain(|ev| {
            seen.push(ev);
            if ev < 3 {
                // Arrival callback interrupting the deferred task
                assert_eq!(queue.push(ev + 1), Ok(Admission::Coalesced));
            }
        });

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(!queue.is_run_pending());
    }

    #[test]
    fn test_reentrant_drain_is_refused() {
        let queue = EventQueue::new(4);
        queue.enqueue(1);
        queue.enqueue(2);

        let mut nested = usize::MAX;
        let handled = queue.drain(|_| {
            nested = queue.drain(|_| {});
        });

        assert_eq!(nested, 0);
        assert_eq!(handled, 2);
    }

    #[test]
    fn test_overflow_converts_to_kv_error() {
        let err: KvError = QueueOverflow { capacity: 16 }.into();
        assert_eq!(err, KvError::QueueOverflow { capacity: 16 });
    }
}
