//! Error types for meshkv.
//!
//! Each component has its own error enum; [`KvError`] is the taxonomy a
//! client sees. No error is fatal to a node: every failure either affects only
//! the current operation or is logged and dropped.

use std::time::Duration;

use thiserror::Error;

use crate::types::{NodeId, RequestId, Status};

/// Errors surfaced by the store as a whole, one variant per failure class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// The shard region had no room left for the record. Never retried.
    #[error("shard {shard} is out of space")]
    OutOfSpace {
        /// Shard that refused the record.
        shard: NodeId,
    },

    /// A pull found no record for the key.
    #[error("key not found")]
    NotFound,

    /// A reply matched no outstanding request (late, duplicated or unsolicited).
    #[error("duplicate or late reply for {id}")]
    DuplicateOrLateReply {
        /// The unmatched request id.
        id: RequestId,
    },

    /// The node's event queue was full; the event was dropped.
    #[error("event queue overflow (capacity {capacity})")]
    QueueOverflow {
        /// Capacity of the queue that overflowed.
        capacity: usize,
    },

    /// The dispatcher gave up after its configured retries.
    #[error("retries exhausted after {elapsed:?}")]
    RetryExhausted {
        /// Time between first dispatch and giving up.
        elapsed: Duration,
    },

    /// The shard refused a malformed record.
    #[error("record rejected by shard {shard}")]
    Rejected {
        /// Shard that refused the record.
        shard: NodeId,
    },
}

impl KvError {
    /// Wire status used to report this error to a client, if it is reportable.
    pub fn status(&self) -> Option<Status> {
        match self {
            KvError::OutOfSpace { .. } => Some(Status::OutOfSpace),
            KvError::NotFound => Some(Status::NotFound),
            KvError::RetryExhausted { .. } => Some(Status::RetryExhausted),
            KvError::Rejected { .. } => Some(Status::Rejected),
            KvError::DuplicateOrLateReply { .. } | KvError::QueueOverflow { .. } => None,
        }
    }
}

/// Errors from the append-only shard store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record does not fit in the remaining region space.
    #[error("out of space: record needs {needed} bytes, {remaining} remaining")]
    OutOfSpace {
        /// Encoded size of the rejected record.
        needed: usize,
        /// Bytes left between the write cursor and the region end.
        remaining: usize,
    },

    /// Keys must be non-empty; a zero key size marks the end of the log.
    #[error("empty key")]
    EmptyKey,

    /// Key or value length exceeds what the record header can describe.
    #[error("{what} too large: {len} bytes (max {max})")]
    TooLarge {
        /// Which field overflowed ("key" or "value").
        what: &'static str,
        /// Actual length.
        len: usize,
        /// Maximum length allowed.
        max: usize,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is structurally valid but semantically wrong.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}
