//! Shard regions and node mailboxes filling up.

use meshkv::client::Outcome;
use meshkv::sim::ChaosConfig;
use meshkv::store::record::encoded_len;
use meshkv::{ClusterConfig, Datum, KvError};

use crate::{settle, sim};

fn one_shard_for_four_records() -> ClusterConfig {
    ClusterConfig {
        shards: 1,
        region_bytes: 4 * encoded_len(1, 1, 4),
        ..ClusterConfig::default()
    }
}

#[test]
fn test_fifth_record_is_out_of_space() {
    let mut sim = sim(one_shard_for_four_records(), ChaosConfig::fast_local(), 1);
    for _ in 0..5 {
        sim.put("A", "1");
        settle(&mut sim);
    }
    sim.pull("A");
    settle(&mut sim);

    let shard_id = sim.topology().shards[0];
    let responses = sim.take_responses();
    let outcomes: Vec<_> = responses.iter().map(|r| r.outcome.clone()).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Stored,
            Outcome::Stored,
            Outcome::Stored,
            Outcome::Stored,
            Outcome::OutOfSpace,
            Outcome::Found(Datum::text("1")),
        ]
    );
    assert_eq!(
        responses[4].clone().into_result(),
        Err(KvError::OutOfSpace { shard: shard_id })
    );

    let shard = sim.shard(0).expect("shard");
    assert_eq!(shard.store().record_count(), 4);
    assert_eq!(shard.store().remaining(), 0);
    assert_eq!(shard.stats().out_of_space, 1);
}

#[test]
fn test_out_of_space_is_not_retried() {
    let mut sim = sim(one_shard_for_four_records(), ChaosConfig::fast_local(), 2);
    for _ in 0..5 {
        sim.put("A", "1");
    }
    settle(&mut sim);

    let dispatcher = sim.dispatcher().expect("dispatcher");
    assert_eq!(dispatcher.tracker().stats().retries, 0);
    assert_eq!(sim.report().responses, 5);
}

#[test]
fn test_clear_frees_the_region() {
    let mut sim = sim(one_shard_for_four_records(), ChaosConfig::fast_local(), 3);
    for _ in 0..4 {
        sim.put("A", "1");
    }
    settle(&mut sim);
    sim.clear();
    settle(&mut sim);
    sim.put("B", "2");
    settle(&mut sim);
    sim.pull("B");
    settle(&mut sim);

    let last = sim.take_responses().pop().expect("responses");
    assert_eq!(last.outcome, Outcome::Found(Datum::text("2")));
}

#[test]
fn test_full_dispatcher_mailbox_drops_requests() {
    let config = ClusterConfig {
        queue_capacity: 2,
        ..ClusterConfig::default()
    };
    let mut sim = sim(config, ChaosConfig::fast_local(), 4);
    for i in 0..6 {
        sim.put(format!("k{i}").as_str(), "v");
    }
    settle(&mut sim);

    // All six arrive in the same instant, before the first drain runs
    let responses = sim.take_responses();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.outcome == Outcome::Stored));
    assert_eq!(sim.report().queue_overflows, 4);
}
