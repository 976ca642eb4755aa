//! Deterministic simulation of a whole cluster.
//!
//! [`SimCluster`] runs every node on one virtual clock and moves packets
//! through a simulated mesh that loses, delays, reorders and corrupts them
//! according to a [`ChaosConfig`]. A seed fully determines a run, so a
//! failing scenario replays exactly.
//!
//! ```text
//!   host ──submit──► Deliver ──► Mailbox::on_packet ──ScheduleDrain──► RunDeferred
//!                                                                       │
//!   host ◄──────── Deliver ◄──── transmit (latency, loss, flips) ◄──────┘
//! ```

mod cluster;
mod config;
mod events;
mod report;

pub use cluster::SimCluster;
pub use config::ChaosConfig;
pub use events::{EventHeap, ScheduledEvent, SimEvent};
pub use report::SimulationReport;
