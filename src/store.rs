use std::collections::hash_map::Entry;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use rustc_hash::FxHasher;

use crate::compute::{AggMap, Aggregate, StrImpl};

/// The shared result map. Keys are spread over a fixed set of independently locked shards by
/// hash, so workers merging different keys rarely wait on each other.
#[derive(Debug)]
pub struct ShardedStore {
    shards: Box<[Mutex<AggMap>]>,
}

impl ShardedStore {
    pub fn new(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            shards: (0..num_shards)
                .map(|_| Mutex::new(AggMap::default()))
                .collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    // fxhash is deterministic, so a key always lands in the same shard whichever worker saw it
    #[inline]
    pub fn shard_for(&self, key: &str) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Folds a worker's local accumulator into the store. The shard lock is taken per key, never
    /// for the whole accumulator.
    pub fn merge(&self, local: AggMap) {
        for (name, agg) in local {
            self.merge_one(name, agg);
        }
    }

    #[inline]
    pub fn merge_one(&self, name: StrImpl, agg: Aggregate) {
        debug_assert!(agg.count > 0, "merging an empty aggregate for {name}");
        let mut shard = self.shards[self.shard_for(&name)].lock();
        match shard.entry(name) {
            Entry::Occupied(entry) => entry.into_mut().merge(agg),
            Entry::Vacant(entry) => {
                entry.insert(agg);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every shard's contents, one shard lock at a time, and returns them sorted by key.
    pub fn snapshot(&self) -> Vec<(StrImpl, Aggregate)> {
        let mut result = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            result.extend(std::mem::take(&mut *shard.lock()));
        }
        // str ordering is byte ordering
        result.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.lock().len()).collect()
    }

    #[cfg(test)]
    fn into_map(self) -> AggMap {
        self.snapshot().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::process_chunk;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn local(input: &str) -> AggMap {
        let mut out = AggMap::default();
        process_chunk(input.as_bytes(), &mut out);
        out
    }

    #[test]
    fn test_merge_combines_same_key() {
        let store = ShardedStore::new(4);
        store.merge(local("A;1.0\nB;2.0\n"));
        store.merge(local("A;3.0\nC;-1.0\n"));
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.snapshot(),
            vec![
                (
                    StrImpl::from("A"),
                    Aggregate {
                        count: 2,
                        sum: 4.0,
                        min: 1.0,
                        max: 3.0
                    }
                ),
                (StrImpl::from("B"), Aggregate::new(2.0)),
                (StrImpl::from("C"), Aggregate::new(-1.0)),
            ]
        );
    }

    #[test]
    fn test_snapshot_drains() {
        let store = ShardedStore::new(8);
        store.merge(local("A;1.0\n"));
        assert_eq!(store.snapshot().len(), 1);
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_shard_for_is_stable() {
        let a = ShardedStore::new(32);
        let b = ShardedStore::new(32);
        for key in ["Hamburg", "Bulawayo", "Palembang", "St. John's", ""] {
            let shard = a.shard_for(key);
            assert!(shard < 32);
            assert_eq!(shard, a.shard_for(key));
            assert_eq!(shard, b.shard_for(key));
        }
    }

    #[test]
    fn test_keys_land_in_one_shard() {
        let store = ShardedStore::new(16);
        for i in 0..10 {
            store.merge(local(&format!("k{};{i}.0\nk{};{i}.0\n", i % 3, (i + 1) % 3)));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.shard_sizes().iter().sum::<usize>(), 3);
        assert_eq!(store.num_shards(), 16);
    }

    #[test]
    fn test_zero_shards_rounds_up() {
        let store = ShardedStore::new(0);
        assert_eq!(store.num_shards(), 1);
        store.merge(local("A;1.0\n"));
        assert_eq!(store.len(), 1);
    }

    // split a fixed dataset into random groups, merge the groups in random order, and check we
    // always land on the same numbers. values are small integers so float sums are exact.
    #[test]
    fn test_merge_order_does_not_matter() {
        let mut rng = StdRng::seed_from_u64(42);
        let keys = ["a", "b", "c", "d", "e"];
        let lines = (0..500)
            .map(|_| {
                let key = keys.choose(&mut rng).unwrap();
                let value: i32 = rng.gen_range(-100..=100);
                format!("{key};{value}\n")
            })
            .collect::<Vec<_>>();

        let baseline = {
            let store = ShardedStore::new(1);
            store.merge(local(&lines.concat()));
            store.into_map()
        };

        for groups in 1..12 {
            let mut parts = vec![String::new(); groups];
            for line in &lines {
                parts[rng.gen_range(0..groups)].push_str(line);
            }
            parts.shuffle(&mut rng);

            let store = ShardedStore::new(rng.gen_range(1..64));
            for part in &parts {
                store.merge(local(part));
            }
            assert_eq!(store.into_map(), baseline, "groups = {groups}");
        }
    }

    #[test]
    fn test_concurrent_merges() {
        let store = ShardedStore::new(8);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..100 {
                        store.merge(local(&format!("k{};{t}\n", i % 10)));
                    }
                });
            }
        });
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 10);
        for (_, agg) in snapshot {
            assert_eq!(agg.count, 80);
            assert_eq!(agg.min, 0.0);
            assert_eq!(agg.max, 7.0);
            assert_eq!(agg.sum, 280.0);
        }
    }
}
