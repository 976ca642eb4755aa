//! Placement policies seen end to end.

use meshkv::client::Outcome;
use meshkv::placement::PlacementKind;
use meshkv::sim::{ChaosConfig, SimCluster};
use meshkv::ClusterConfig;

use crate::{settle, sim};

fn placed(placement: PlacementKind, seed: u64) -> SimCluster {
    let config = ClusterConfig {
        shards: 3,
        placement,
        ..ClusterConfig::default()
    };
    sim(config, ChaosConfig::fast_local(), seed)
}

#[test]
fn test_least_loaded_spreads_equal_puts() {
    let mut sim = placed(PlacementKind::LeastLoaded, 11);
    for i in 0..30 {
        let (key, value) = (format!("k{i:02}"), format!("v{i:02}"));
        sim.put(key.as_str(), value.as_str());
    }
    settle(&mut sim);
    let responses = sim.take_responses();
    assert!(responses.iter().all(|r| r.outcome == Outcome::Stored));

    let counts: Vec<_> = (0..3)
        .map(|i| sim.shard(i).expect("shard"))
        .map(|shard| shard.store().record_count())
        .collect();
    assert_eq!(counts, vec![10, 10, 10]);
    assert_eq!(sim.dispatcher().expect("dispatcher").loads().spread(), 0);
}

#[test]
fn test_round_robin_cycles_shards() {
    let mut sim = placed(PlacementKind::RoundRobin, 12);
    for i in 0..9 {
        sim.put(format!("key-{}", i).as_str(), "x");
    }
    settle(&mut sim);

    for i in 0..3 {
        assert_eq!(sim.shard(i).expect("shard").stats().puts, 3);
    }

    // Pulls are broadcast, so a hit on any shard answers
    sim.pull("key-4");
    settle(&mut sim);
    let last = sim.take_responses().pop().expect("responses");
    assert_eq!(last.outcome, Outcome::Found(meshkv::Datum::text("x")));
}

#[test]
fn test_hash_pull_asks_a_single_shard() {
    let mut sim = placed(PlacementKind::Hash, 13);
    sim.put("color", "blue");
    settle(&mut sim);
    sim.pull("color");
    settle(&mut sim);

    let (hits, misses) = (0..3)
        .map(|i| sim.shard(i).expect("shard").stats())
        .fold((0, 0), |(h, m), s| (h + s.hits, m + s.misses));
    assert_eq!((hits, misses), (1, 0));

    let last = sim.take_responses().pop().expect("responses");
    assert_eq!(last.outcome, Outcome::Found(meshkv::Datum::text("blue")));
}

#[test]
fn test_broadcast_miss_reports_not_found() {
    let mut sim = placed(PlacementKind::LeastLoaded, 14);
    sim.pull("nothing");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].outcome, Outcome::NotFound);
    let misses: u64 = (0..3)
        .map(|i| sim.shard(i).expect("shard").stats().misses)
        .sum();
    assert_eq!(misses, 3);
}
