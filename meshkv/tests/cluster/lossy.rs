//! Lossy, reordering and corrupting mesh: every request still gets exactly
//! one response.

use std::collections::BTreeMap;
use std::time::Duration;

use meshkv::client::Outcome;
use meshkv::sim::{ChaosConfig, SimCluster};
use meshkv::{ClusterConfig, RequestId};

use crate::{settle, sim};

fn issue_puts(sim: &mut SimCluster, count: usize) -> Vec<RequestId> {
    (0..count)
        .map(|i| {
            let id = sim.put(format!("key-{:03}", i).as_str(), "value");
            let next = sim.now() + Duration::from_millis(1);
            sim.run_until(next);
            id
        })
        .collect()
}

fn responses_per_id(sim: &mut SimCluster) -> BTreeMap<RequestId, Vec<Outcome>> {
    let mut by_id: BTreeMap<RequestId, Vec<Outcome>> = BTreeMap::new();
    for response in sim.take_responses() {
        by_id
            .entry(response.id)
            .or_default()
            .push(response.outcome);
    }
    by_id
}

#[test]
fn test_every_request_answered_exactly_once_under_loss() {
    for seed in 0..8 {
        let mut sim = sim(ClusterConfig::default(), ChaosConfig::lossy(0.3), seed);
        let ids = issue_puts(&mut sim, 40);
        settle(&mut sim);

        let by_id = responses_per_id(&mut sim);
        let answered: Vec<_> = by_id.keys().copied().collect();
        assert_eq!(answered, ids, "seed {}", seed);
        for (id, outcomes) in &by_id {
            assert_eq!(
                outcomes.len(),
                1,
                "seed {} {} answered {:?}",
                seed,
                id,
                outcomes
            );
            assert!(
                matches!(outcomes[0], Outcome::Stored | Outcome::RetryExhausted),
                "seed {} {}: {:?}",
                seed,
                id,
                outcomes[0]
            );
        }
        assert!(sim.report().packets_dropped > 0, "seed {}", seed);
    }
}

#[test]
fn test_retries_recover_most_requests() {
    let mut sim = sim(ClusterConfig::default(), ChaosConfig::lossy(0.2), 17);
    issue_puts(&mut sim, 50);
    settle(&mut sim);

    let stored = sim
        .take_responses()
        .iter()
        .filter(|r| r.outcome == Outcome::Stored)
        .count();
    // A put fails only if four consecutive round trips are lost
    assert!(stored >= 45, "only {} of 50 stored", stored);
    let tracker = sim.dispatcher().expect("dispatcher").tracker().stats();
    assert!(tracker.retries > 0);
}

#[test]
fn test_corrupt_packets_are_dropped_not_applied() {
    let chaos = ChaosConfig {
        corrupt_probability: 0.25,
        ..ChaosConfig::default()
    };
    let mut sim = sim(ClusterConfig::default(), chaos, 5);
    let ids = issue_puts(&mut sim, 30);
    settle(&mut sim);

    let by_id = responses_per_id(&mut sim);
    assert_eq!(by_id.len(), ids.len());
    assert!(by_id.values().all(|outcomes| outcomes.len() == 1));

    let corrupt: u64 = sim
        .topology()
        .all_nodes()
        .filter_map(|id| sim.node(id))
        .map(|node| node.stats().corrupt_packets)
        .sum();
    assert_eq!(corrupt, sim.report().packets_corrupted);
    assert!(corrupt > 0);
}

#[test]
fn test_late_replies_are_counted_not_delivered() {
    // Latency wider than the retry interval forces duplicate replies
    let chaos = ChaosConfig {
        latency: Duration::from_millis(1)..=Duration::from_millis(80),
        ..ChaosConfig::default()
    };
    let mut sim = sim(ClusterConfig::default(), chaos, 9);
    let ids = issue_puts(&mut sim, 30);
    settle(&mut sim);

    let by_id = responses_per_id(&mut sim);
    assert_eq!(by_id.len(), ids.len());
    assert!(by_id.values().all(|outcomes| outcomes.len() == 1));
    let stats = sim.dispatcher().expect("dispatcher").stats();
    assert!(stats.late_replies > 0);
}
