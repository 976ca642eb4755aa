//! Unreachable shards: requests fail with `RetryExhausted` after exactly the
//! configured number of retries.

use std::time::Duration;

use meshkv::client::Outcome;
use meshkv::config::{MissPolicy, TrackerConfig};
use meshkv::placement::PlacementKind;
use meshkv::sim::ChaosConfig;
use meshkv::{ClusterConfig, KvError};

use crate::{settle, sim};

fn single_shard() -> ClusterConfig {
    ClusterConfig {
        shards: 1,
        tracker: TrackerConfig {
            retry_interval: Duration::from_millis(50),
            pull_retry_offset: Duration::from_millis(7),
            max_retries: 3,
        },
        ..ClusterConfig::default()
    }
}

#[test]
fn test_partitioned_shard_exhausts_retries() {
    let mut sim = sim(single_shard(), ChaosConfig::fast_local(), 1);
    let shard = sim.topology().shards[0];
    sim.partition(shard);

    sim.put("k", "v");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 1);
    let failure = &responses[0];
    assert_eq!(failure.outcome, Outcome::RetryExhausted);
    assert_eq!(failure.from, sim.topology().dispatcher);
    assert!(
        failure.elapsed >= Duration::from_millis(200),
        "{:?}",
        failure.elapsed
    );
    assert!(matches!(
        failure.clone().into_result(),
        Err(KvError::RetryExhausted { .. })
    ));

    // One first attempt plus exactly three retries, all lost
    let report = sim.report();
    assert_eq!(report.packets_partitioned, 4);
    assert_eq!(report.failures, 1);
    let tracker = sim.dispatcher().expect("dispatcher").tracker().stats();
    assert_eq!((tracker.retries, tracker.expired), (3, 1));
}

#[test]
fn test_healed_shard_serves_again() {
    let mut sim = sim(single_shard(), ChaosConfig::fast_local(), 2);
    let shard = sim.topology().shards[0];
    sim.partition(shard);
    sim.put("k", "v");
    settle(&mut sim);

    sim.heal(shard);
    sim.put("k", "v");
    settle(&mut sim);

    let outcomes: Vec<_> = sim
        .take_responses()
        .into_iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(outcomes, vec![Outcome::RetryExhausted, Outcome::Stored]);
}

#[test]
fn test_broadcast_pull_with_silent_shard_fails() {
    let config = ClusterConfig {
        shards: 3,
        placement: PlacementKind::LeastLoaded,
        ..single_shard()
    };
    let mut sim = sim(config, ChaosConfig::fast_local(), 3);
    let silent = sim.topology().shards[2];
    sim.partition(silent);

    sim.pull("missing");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].outcome, Outcome::RetryExhausted);
    // Retries went to the silent shard only
    assert_eq!(sim.report().packets_partitioned, 4);
}

#[test]
fn test_broadcast_pull_hit_wins_despite_silent_shard() {
    let config = ClusterConfig {
        shards: 3,
        placement: PlacementKind::LeastLoaded,
        ..single_shard()
    };
    let mut sim = sim(config, ChaosConfig::fast_local(), 4);
    sim.put("k", "v");
    settle(&mut sim);
    sim.partition(sim.topology().shards[2]);

    sim.pull("k");
    settle(&mut sim);

    let last = sim.take_responses().pop().expect("responses");
    assert_eq!(last.outcome, Outcome::Found(meshkv::Datum::text("v")));
}

#[test]
fn test_silent_miss_policy_times_out() {
    let config = ClusterConfig {
        miss_policy: MissPolicy::Silent,
        ..single_shard()
    };
    let mut sim = sim(config, ChaosConfig::fast_local(), 5);
    sim.pull("missing");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses[0].outcome, Outcome::RetryExhausted);
    assert_eq!(sim.shard(0).expect("shard").stats().misses, 4);
}
