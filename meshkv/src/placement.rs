//! Shard selection: decides which shard receives a request.
//!
//! The dispatcher holds one [`ShardSelector`] and never branches on the policy
//! itself. Two families exist:
//!
//! - **Hashing** ([`HashPlacement`]): a key always maps to the same shard, so a
//!   pull goes to exactly one shard.
//! - **Load-driven** ([`RoundRobinPlacement`], [`LeastLoadedPlacement`]): a put
//!   may land anywhere, so a pull is broadcast and the first successful reply
//!   wins.
//!
//! Selectors work on shard *indices* into the dispatcher's shard list; the
//! dispatcher maps indices to node ids.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::types::Datum;

/// Where a pull must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRoute {
    /// Exactly one shard can hold the key.
    Single(usize),
    /// Any shard may hold the key; ask all of them.
    Broadcast,
}

/// Approximate bytes stored per shard, as seen by the dispatcher.
///
/// Updated optimistically when a put is dispatched and reset by clear. It is
/// a balancing hint only: lost or refused puts are never subtracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTable {
    estimates: Vec<u64>,
}

impl LoadTable {
    /// A table of `shards` zero estimates.
    pub fn new(shards: usize) -> Self {
        Self {
            estimates: vec![0; shards],
        }
    }

    /// Add `bytes` to a shard's estimate.
    pub fn add(&mut self, shard: usize, bytes: u64) {
        if let Some(estimate) = self.estimates.get_mut(shard) {
            *estimate = estimate.saturating_add(bytes);
        }
    }

    /// Reset every estimate to zero.
    pub fn reset(&mut self) {
        self.estimates.iter_mut().for_each(|e| *e = 0);
    }

    /// Estimate for one shard.
    pub fn get(&self, shard: usize) -> u64 {
        self.estimates.get(shard).copied().unwrap_or(0)
    }

    /// All estimates, indexed by shard.
    pub fn as_slice(&self) -> &[u64] {
        &self.estimates
    }

    /// Number of shards tracked.
    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    /// Whether the table tracks no shard.
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Index of the least-loaded shard; ties go to the lowest index.
    pub fn least_loaded(&self) -> usize {
        self.estimates
            .iter()
            .enumerate()
            .min_by_key(|(index, load)| (**load, *index))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Difference between the most and least loaded shards.
    pub fn spread(&self) -> u64 {
        let max = self.estimates.iter().copied().max().unwrap_or(0);
        let min = self.estimates.iter().copied().min().unwrap_or(0);
        max - min
    }
}

/// Strategy for choosing shards.
pub trait ShardSelector: fmt::Debug {
    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    /// Choose the shard index for a put of `key`.
    fn select_put(&mut self, key: &Datum, loads: &LoadTable) -> usize;

    /// Decide where a pull of `key` must go.
    fn route_pull(&self, key: &Datum, shard_count: usize) -> PullRoute;
}

/// Key-hash placement (XxHash64 over the key bytes, modulo shard count).
#[derive(Debug, Clone, Default)]
pub struct HashPlacement {
    seed: u64,
}

impl HashPlacement {
    /// Hash placement with the given hash seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Shard index for `key` among `shard_count` shards.
    pub fn shard_for(&self, key: &Datum, shard_count: usize) -> usize {
        if shard_count == 0 {
            return 0;
        }
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(&key.bytes);
        (hasher.finish() % shard_count as u64) as usize
    }
}

impl ShardSelector for HashPlacement {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn select_put(&mut self, key: &Datum, loads: &LoadTable) -> usize {
        self.shard_for(key, loads.len())
    }

    fn route_pull(&self, key: &Datum, shard_count: usize) -> PullRoute {
        PullRoute::Single(self.shard_for(key, shard_count))
    }
}

/// Cycle through shards in order.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinPlacement {
    next: usize,
}

impl ShardSelector for RoundRobinPlacement {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select_put(&mut self, _key: &Datum, loads: &LoadTable) -> usize {
        if loads.is_empty() {
            return 0;
        }
        let shard = self.next % loads.len();
        self.next = (shard + 1) % loads.len();
        shard
    }

    fn route_pull(&self, _key: &Datum, _shard_count: usize) -> PullRoute {
        PullRoute::Broadcast
    }
}

/// Send each put to the shard with the smallest load estimate.
#[derive(Debug, Clone, Default)]
pub struct LeastLoadedPlacement;

impl ShardSelector for LeastLoadedPlacement {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select_put(&mut self, _key: &Datum, loads: &LoadTable) -> usize {
        loads.least_loaded()
    }

    fn route_pull(&self, _key: &Datum, _shard_count: usize) -> PullRoute {
        PullRoute::Broadcast
    }
}

/// Configurable choice of placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    /// [`HashPlacement`] with seed 0.
    #[default]
    Hash,
    /// [`RoundRobinPlacement`].
    RoundRobin,
    /// [`LeastLoadedPlacement`].
    LeastLoaded,
}

impl PlacementKind {
    /// Instantiate the selector.
    pub fn build(self) -> Box<dyn ShardSelector> {
        match self {
            PlacementKind::Hash => Box::new(HashPlacement::default()),
            PlacementKind::RoundRobin => Box::new(RoundRobinPlacement::default()),
            PlacementKind::LeastLoaded => Box::new(LeastLoadedPlacement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_placement_is_stable() {
        let placement = HashPlacement::default();
        let key = Datum::text("user:42");
        let first = placement.shard_for(&key, 7);
        for _ in 0..10 {
            assert_eq!(placement.shard_for(&key, 7), first);
        }
        assert!(first < 7);
        assert_eq!(placement.route_pull(&key, 7), PullRoute::Single(first));
    }

    #[test]
    fn test_hash_placement_spreads_keys() {
        let mut placement = HashPlacement::default();
        let loads = LoadTable::new(4);
        let mut hits = [0usize; 4];
        for i in 0..400 {
            let key = Datum::text(&format!("key-{}", i));
            hits[placement.select_put(&key, &loads)] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0), "every shard used: {:?}", hits);
    }

    #[test]
    fn test_hash_put_and_pull_agree() {
        let mut placement = HashPlacement::with_seed(99);
        let loads = LoadTable::new(5);
        let key = Datum::text("abc");
        let put_shard = placement.select_put(&key, &loads);
        assert_eq!(placement.route_pull(&key, 5), PullRoute::Single(put_shard));
    }

    #[test]
    fn test_round_robin_cycles() {
        let mut placement = RoundRobinPlacement::default();
        let loads = LoadTable::new(3);
        let key = Datum::text("k");
        let picks: Vec<_> = (0..7)
            .map(|_| placement.select_put(&key, &loads))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(placement.route_pull(&key, 3), PullRoute::Broadcast);
    }

    #[test]
    fn test_least_loaded_balances_within_one_record() {
        let mut placement = LeastLoadedPlacement;
        let mut loads = LoadTable::new(3);
        let key = Datum::text("k");
        for n in 1..=20 {
            let shard = placement.select_put(&key, &loads);
            loads.add(shard, 16);
            assert!(loads.spread() <= 16, "after {} puts: {:?}", n, loads);
        }
        assert_eq!(loads.as_slice().iter().sum::<u64>(), 20 * 16);
    }

    #[test]
    fn test_least_loaded_ties_go_to_lowest_index() {
        let mut loads = LoadTable::new(3);
        assert_eq!(loads.least_loaded(), 0);
        loads.add(0, 5);
        assert_eq!(loads.least_loaded(), 1);
        loads.add(1, 5);
        loads.add(2, 5);
        assert_eq!(loads.least_loaded(), 0);
    }

    #[test]
    fn test_load_table_reset() {
        let mut loads = LoadTable::new(2);
        loads.add(0, 10);
        loads.add(1, 3);
        loads.add(9, 3); // unknown shard ignored
        assert_eq!(loads.spread(), 7);
        loads.reset();
        assert_eq!(loads.as_slice(), &[0, 0]);
    }

    #[test]
    fn test_placement_kind_from_json() {
        let kind: PlacementKind = serde_json::from_str("\"least_loaded\"").expect("parse");
        assert_eq!(kind, PlacementKind::LeastLoaded);
        assert_eq!(kind.build().name(), "least_loaded");
        assert_eq!(PlacementKind::default().build().name(), "hash");
    }
}
