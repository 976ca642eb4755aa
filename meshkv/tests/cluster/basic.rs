//! Put / pull / clear through the full message path.

use std::time::Duration;

use meshkv::client::Outcome;
use meshkv::sim::ChaosConfig;
use meshkv::{ClusterConfig, Datum, KvError, RequestId};

use crate::{settle, sim};

#[test]
fn test_put_then_pull_returns_value() {
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::fast_local(), 1);
    let put = sim.put("color", "blue");
    settle(&mut sim);
    let pull = sim.pull("color");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, put);
    assert_eq!(responses[0].outcome, Outcome::Stored);
    assert_eq!(responses[1].id, pull);
    assert_eq!(
        responses[1].clone().into_result(),
        Ok(Some(Datum::text("blue")))
    );
}

#[test]
fn test_duplicate_put_keeps_first_value() {
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::fast_local(), 2);
    sim.put("k", "v1");
    settle(&mut sim);
    sim.put("k", "v2");
    settle(&mut sim);
    sim.pull("k");
    settle(&mut sim);

    let outcomes: Vec<_> = sim
        .take_responses()
        .into_iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Stored,
            Outcome::Stored,
            Outcome::Found(Datum::text("v1"))
        ]
    );
}

#[test]
fn test_clear_then_pull_is_not_found() {
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::fast_local(), 3);
    for key in ["a", "b", "c", "d"] {
        sim.put(key, "x");
    }
    settle(&mut sim);
    sim.clear();
    settle(&mut sim);
    sim.pull("c");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses.len(), 6);
    assert_eq!(responses[4].outcome, Outcome::Cleared);
    assert_eq!(responses[5].clone().into_result(), Err(KvError::NotFound));

    for index in 0..3 {
        let shard = sim.shard(index).expect("shard");
        assert_eq!(shard.store().record_count(), 0);
        assert_eq!(shard.stats().clears, 1);
    }
    let dispatcher = sim.dispatcher().expect("dispatcher");
    assert_eq!(dispatcher.loads().spread(), 0);
    assert_eq!(dispatcher.loads().as_slice().iter().sum::<u64>(), 0);
}

#[test]
fn test_response_reports_round_trip_time() {
    // 1ms each way between dispatcher and shard
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::fast_local(), 4);
    sim.put("k", "v");
    settle(&mut sim);

    let responses = sim.take_responses();
    assert_eq!(responses[0].elapsed, Duration::from_millis(2));
}

#[test]
fn test_responses_echo_client_ids() {
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::default(), 5);
    let ids: Vec<RequestId> = (0..20)
        .map(|i| sim.put(format!("key-{}", i).as_str(), "v"))
        .collect();
    settle(&mut sim);

    let mut answered: Vec<_> = sim.take_responses().into_iter().map(|r| r.id).collect();
    answered.sort();
    assert_eq!(answered, ids);
}
