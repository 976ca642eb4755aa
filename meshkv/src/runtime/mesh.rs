//! In-process mesh transport over unbounded channels.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;

use crate::node::Outgoing;
use crate::types::NodeId;

/// One inbound channel per node plus one for the host.
///
/// Mesh links lose packets with `loss` probability; the host link is
/// reliable. Channels never split or merge packets.
#[derive(Debug)]
pub(crate) struct ChannelMesh {
    links: BTreeMap<NodeId, mpsc::UnboundedSender<Bytes>>,
    host: mpsc::UnboundedSender<Bytes>,
    loss: f64,
    rng: RefCell<ChaCha8Rng>,
    dropped: Cell<u64>,
}

impl ChannelMesh {
    pub(crate) fn new(
        links: BTreeMap<NodeId, mpsc::UnboundedSender<Bytes>>,
        host: mpsc::UnboundedSender<Bytes>,
        loss: f64,
        seed: u64,
    ) -> Self {
        Self {
            links,
            host,
            loss,
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            dropped: Cell::new(0),
        }
    }

    /// Hand a packet to its next hop.
    pub(crate) fn send(&self, from: NodeId, outgoing: Outgoing) {
        let Outgoing { to, packet } = outgoing;
        if to.is_host() {
            if self.host.send(packet).is_err() {
                tracing::debug!(from = %from, "host gone, response discarded");
            }
            return;
        }

        if self.loss > 0.0 && self.rng.borrow_mut().random_bool(self.loss) {
            self.dropped.set(self.dropped.get() + 1);
            tracing::trace!(from = %from, to = %to, "packet lost");
            return;
        }

        match self.links.get(&to) {
            Some(link) => {
                if link.send(packet).is_err() {
                    tracing::debug!(from = %from, to = %to, "node stopped, packet discarded");
                }
            }
            None => tracing::warn!(from = %from, to = %to, "no link to node"),
        }
    }

    /// Hand a packet from the host straight to `to`, bypassing loss.
    pub(crate) fn inject(&self, to: NodeId, packet: Bytes) -> bool {
        self.links
            .get(&to)
            .is_some_and(|link| link.send(packet).is_ok())
    }

    /// Packets lost so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}
