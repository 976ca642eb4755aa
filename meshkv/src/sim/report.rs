//! Simulation metrics and reporting.

use std::fmt;
use std::time::Duration;

/// Counters collected during a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Seed of the run.
    pub seed: u64,
    /// Simulated logical time elapsed.
    pub simulated_time: Duration,
    /// Number of events processed.
    pub events_processed: u64,
    /// Packets handed to the transport.
    pub packets_sent: u64,
    /// Packets lost to random drops.
    pub packets_dropped: u64,
    /// Packets lost to partitions.
    pub packets_partitioned: u64,
    /// Packets delivered with a flipped bit.
    pub packets_corrupted: u64,
    /// Packets dropped on a full mailbox.
    pub queue_overflows: u64,
    /// Responses delivered to the host.
    pub responses: u64,
    /// Of those, `Failure` responses.
    pub failures: u64,
}

impl SimulationReport {
    /// Share of sent packets that never reached a mailbox.
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        (self.packets_dropped + self.packets_partitioned) as f64 / self.packets_sent as f64
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Report (seed {}) ===", self.seed)?;
        writeln!(f, "Simulated time:   {:?}", self.simulated_time)?;
        writeln!(f, "Events processed: {}", self.events_processed)?;
        writeln!(
            f,
            "Packets:          {} sent, {} dropped, {} partitioned, {} corrupted ({:.1}% lost)",
            self.packets_sent,
            self.packets_dropped,
            self.packets_partitioned,
            self.packets_corrupted,
            self.loss_rate() * 100.0
        )?;
        writeln!(f, "Queue overflows:  {}", self.queue_overflows)?;
        write!(
            f,
            "Responses:        {} ({} failures)",
            self.responses, self.failures
        )
    }
}
