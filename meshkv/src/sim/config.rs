//! # Network Chaos Configuration
//!
//! Faults injected by the simulated mesh transport.
//!
//! | Fault | Config Field | Default | Exercises |
//! |-------|--------------|---------|-----------|
//! | Packet loss | `drop_probability` | 0% | tracker retries, `RetryExhausted` |
//! | Bit flip | `corrupt_probability` | 0% | packet checksums |
//! | Reordering | `latency` range | 1ms..=5ms | out-of-order replies, late replies |
//! | Partition | `SimCluster::partition` | manual | unreachable shards |
//!
//! Links to and from the external host are never lossy: the host sits outside
//! the mesh. They still see latency.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::ConfigError;

/// Chaos settings for the simulated mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Probability that a mesh packet is silently dropped.
    pub drop_probability: f64,
    /// Probability that a mesh packet has one bit flipped.
    pub corrupt_probability: f64,
    /// Per-packet delivery latency, sampled uniformly.
    pub latency: RangeInclusive<Duration>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            corrupt_probability: 0.0,
            latency: Duration::from_millis(1)..=Duration::from_millis(5),
        }
    }
}

impl ChaosConfig {
    /// No faults and a fixed 1ms latency.
    pub fn fast_local() -> Self {
        Self {
            latency: Duration::from_millis(1)..=Duration::from_millis(1),
            ..Self::default()
        }
    }

    /// Default latency with the given packet loss.
    pub fn lossy(drop_probability: f64) -> Self {
        Self {
            drop_probability,
            ..Self::default()
        }
    }

    /// Check probabilities and the latency range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, p) in [
            ("drop_probability", self.drop_probability),
            ("corrupt_probability", self.corrupt_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!("{name} {p} outside [0, 1]")));
            }
        }
        if self.latency.start() > self.latency.end() {
            return Err(ConfigError::Invalid("latency range is empty".into()));
        }
        Ok(())
    }
}
