//! Relay: stateless store-and-forward of shard replies.
//!
//! A relay sits between a block of shards and the dispatcher. It never looks
//! inside a reply; it only passes it on toward the reply's final destination.

use crate::node::Envelope;
use crate::types::NodeId;
use crate::wire::Message;

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Messages passed on.
    pub forwarded: u64,
    /// Messages dropped (requests, or replies addressed to the relay itself).
    pub dropped: u64,
}

/// A forwarding node.
#[derive(Debug)]
pub struct Relay {
    node_id: NodeId,
    stats: RelayStats,
}

impl Relay {
    /// Create a relay.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            stats: RelayStats::default(),
        }
    }

    /// Pass `message` on toward `message.dest`.
    pub fn forward(&mut self, message: Message) -> Option<Envelope> {
        if message.command.is_request() {
            self.stats.dropped += 1;
            tracing::warn!(
                node = %self.node_id,
                id = %message.id,
                from = %message.source,
                "relay received a request, dropping"
            );
            return None;
        }
        if message.dest == self.node_id {
            self.stats.dropped += 1;
            tracing::warn!(
                node = %self.node_id,
                id = %message.id,
                "reply addressed to relay, dropping"
            );
            return None;
        }

        self.stats.forwarded += 1;
        tracing::trace!(
            node = %self.node_id,
            id = %message.id,
            from = %message.source,
            to = %message.dest,
            "forwarding"
        );
        Some(Envelope::new(message.dest, message))
    }

    /// This relay's node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Relay counters.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Command, Datum, RequestId, Status};

    const RELAY: NodeId = NodeId::new(0, 1, 0);

    fn reply() -> Message {
        Message::request(
            Command::Put,
            RequestId(3),
            NodeId::new(0, 0, 0),
            NodeId::new(1, 0, 0),
            Datum::text("k"),
            Datum::text("v"),
        )
        .reply(NodeId::new(1, 0, 0), Status::Ok, Datum::empty())
        .expect("put has a reply")
    }

    #[test]
    fn test_forwards_to_final_destination() {
        let mut relay = Relay::new(RELAY);
        let msg = reply();
        let env = relay.forward(msg.clone()).expect("forwarded");
        assert_eq!(env.next_hop, NodeId::new(0, 0, 0));
        assert_eq!(env.message, msg);
        assert_eq!(relay.stats().forwarded, 1);
    }

    #[test]
    fn test_drops_requests() {
        let mut relay = Relay::new(RELAY);
        let request = Message::request(
            Command::Pull,
            RequestId(1),
            NodeId::HOST,
            RELAY,
            Datum::text("k"),
            Datum::empty(),
        );
        assert!(relay.forward(request).is_none());
        assert_eq!(relay.stats().dropped, 1);
    }

    #[test]
    fn test_drops_messages_addressed_to_itself() {
        let mut relay = Relay::new(RELAY);
        let mut msg = reply();
        msg.dest = RELAY;
        assert!(relay.forward(msg).is_none());
    }
}
