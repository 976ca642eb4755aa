//! Replies routed back through relays.

use meshkv::client::Outcome;
use meshkv::placement::PlacementKind;
use meshkv::sim::ChaosConfig;
use meshkv::{ClusterConfig, Datum};

use crate::{settle, sim};

fn relayed() -> ClusterConfig {
    ClusterConfig {
        shards: 4,
        relays: 2,
        placement: PlacementKind::LeastLoaded,
        ..ClusterConfig::default()
    }
}

#[test]
fn test_relays_forward_shard_replies() {
    let mut sim = sim(relayed(), ChaosConfig::fast_local(), 21);
    for key in ["a", "b", "c", "d"] {
        sim.put(key, key);
    }
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 4);
    assert!(responses.iter().all(|r| r.outcome == Outcome::Stored));

    // Shards 0,1 reply through relay 0 and shards 2,3 through relay 1
    let relays = sim.topology().relays.clone();
    for relay in relays {
        let stats = sim
            .node(relay)
            .and_then(|n| n.as_relay())
            .expect("relay node")
            .stats();
        assert_eq!(stats.forwarded, 2, "relay {}", relay);
        assert_eq!(stats.dropped, 0);
    }
}

#[test]
fn test_pulls_through_relays() {
    let mut sim = sim(relayed(), ChaosConfig::fast_local(), 22);
    for key in ["a", "b", "c", "d"] {
        sim.put(key, key);
    }
    settle(&mut sim);
    sim.take_responses();

    for key in ["a", "b", "c", "d"] {
        sim.pull(key);
    }
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 4);
    for response in responses {
        let key = response.key.as_text().expect("text key");
        assert_eq!(response.outcome, Outcome::Found(Datum::text(key)));
    }
}

#[test]
fn test_relay_adds_a_hop() {
    let mut sim = sim(relayed(), ChaosConfig::fast_local(), 23);
    sim.put("k", "v");
    settle(&mut sim);

    // host, dispatcher -> shard, shard -> relay, relay -> dispatcher, host
    let response = sim.take_responses().pop().expect("response");
    assert_eq!(response.elapsed, std::time::Duration::from_millis(3));
}
