#![cfg(test)]

// Property tests for the sharded hash table, kept inside the crate next
// to the engine they exercise.

use crate::hash_table::{ConcurrentMap, ConcurrentMultiMap};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    EraseAll(usize),
    EraseOne(usize, usize),
    Get(usize),
    Contains(String),
    Rehash(usize),
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            idx.clone().prop_map(OpI::EraseAll),
            (idx.clone(), any::<usize>()).prop_map(|(i, n)| OpI::EraseOne(i, n)),
            idx.clone().prop_map(OpI::Get),
            prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            (1usize..2048).prop_map(OpI::Rehash),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Shared body for the multi-map properties. The model keeps each key's
// entries newest first, matching the engine's chain order.
fn run_multi_scenario<S: BuildHasher>(
    table: &ConcurrentMultiMap<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, Vec<i32>> = HashMap::new();
    let mut floor_buckets = table.bucket_count();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                table.insert(k.clone(), v);
                model.entry(k).or_default().insert(0, v);
            }
            OpI::EraseAll(i) => {
                let k = key_from(pool, i);
                let removed = table.erase(pool[i].as_str());
                let expected = model.remove(&k).map_or(0, |entries| entries.len());
                prop_assert_eq!(removed, expected, "erase must remove the whole equal range");
            }
            OpI::EraseOne(i, n) => {
                let k = key_from(pool, i);
                let target = model
                    .get(&k)
                    .filter(|entries| !entries.is_empty())
                    .map(|entries| entries[n % entries.len()]);
                match target {
                    Some(value) => {
                        let removed = table.erase_if(pool[i].as_str(), |entry| entry.1 == value);
                        prop_assert_eq!(removed.map(|entry| entry.1), Some(value));
                        let entries = model.get_mut(&k).expect("model has the key");
                        let position = entries
                            .iter()
                            .position(|&v| v == value)
                            .expect("model has the value");
                        entries.remove(position);
                        if entries.is_empty() {
                            model.remove(&k);
                        }
                    }
                    None => {
                        let removed = table.erase_if(pool[i].as_str(), |_| true);
                        prop_assert!(removed.is_none(), "nothing to erase under an absent key");
                    }
                }
            }
            OpI::Get(i) => {
                let k = key_from(pool, i);
                let found = table.get_all(pool[i].as_str());
                let expected = model.get(&k).cloned().unwrap_or_default();
                prop_assert_eq!(found, expected, "equal range must match, newest first");
            }
            OpI::Contains(s) => {
                let has = table.contains(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Rehash(buckets) => {
                table.rehash(buckets);
            }
        }

        // Post-conditions after each op:
        // 1) size parity with the model
        let total: usize = model.values().map(Vec::len).sum();
        prop_assert_eq!(table.len(), total);
        prop_assert_eq!(table.is_empty(), total == 0);
        // 2) the bucket count never shrinks
        prop_assert!(table.bucket_count() >= floor_buckets);
        floor_buckets = table.bucket_count();
        // 3) per-key count parity across the whole pool
        for (i, raw) in pool.iter().enumerate() {
            let k = key_from(pool, i);
            let expected = model.get(&k).map_or(0, Vec::len);
            prop_assert_eq!(table.count(raw.as_str()), expected);
        }
    }
    Ok(())
}

// Shared body for the unique-map properties.
fn run_unique_scenario<S: BuildHasher>(
    table: &ConcurrentMap<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut floor_buckets = table.bucket_count();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let fresh = table.insert(k.clone(), v);
                prop_assert_eq!(
                    fresh,
                    !model.contains_key(&k),
                    "insert succeeds exactly when the key is absent"
                );
                if fresh {
                    model.insert(k, v);
                }
            }
            OpI::EraseAll(i) => {
                let k = key_from(pool, i);
                let removed = table.erase(pool[i].as_str());
                let expected = usize::from(model.remove(&k).is_some());
                prop_assert_eq!(removed, expected);
            }
            OpI::EraseOne(i, n) => {
                // Conditional erase: the predicate passes only for one
                // value parity, so a resident entry may survive it.
                let k = key_from(pool, i);
                let wanted = (n % 2) as i32;
                let expected = model
                    .get(&k)
                    .copied()
                    .filter(|v| v.rem_euclid(2) == wanted);
                let removed = table
                    .erase_if(pool[i].as_str(), |entry| entry.1.rem_euclid(2) == wanted)
                    .map(|entry| entry.1);
                prop_assert_eq!(removed, expected);
                if removed.is_some() {
                    model.remove(&k);
                }
            }
            OpI::Get(i) => {
                let k = key_from(pool, i);
                let found = table.get(pool[i].as_str());
                prop_assert_eq!(found, model.get(&k).copied());
            }
            OpI::Contains(s) => {
                let has = table.contains(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Rehash(buckets) => {
                table.rehash(buckets);
            }
        }

        prop_assert_eq!(table.len(), model.len());
        prop_assert_eq!(table.is_empty(), model.is_empty());
        prop_assert!(table.bucket_count() >= floor_buckets);
        floor_buckets = table.bucket_count();
        for (i, raw) in pool.iter().enumerate() {
            let k = key_from(pool, i);
            let expected = usize::from(model.contains_key(&k));
            prop_assert_eq!(table.count(raw.as_str()), expected);
        }
    }
    Ok(())
}

// Property: State-machine equivalence of the multi map against a model
// keyed the same way. Invariants exercised across random op sequences:
// - equal keys accumulate; `get_all` yields the range newest first
// - `erase` drops the whole range, `erase_if` exactly one chosen entry
// - `len`/`count` parity with the model after every op
// - the bucket count is monotone under interleaved rehash requests
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_multi_map_state_machine((pool, ops) in arb_scenario()) {
        let table: ConcurrentMultiMap<Key, i32> = ConcurrentMultiMap::new();
        run_multi_scenario(&table, &pool, ops)?;
    }
}

// Property: State-machine equivalence of the unique map: inserts succeed
// exactly when the key is absent, the resident entry survives rejected
// inserts and failed conditional erases, and size stays in lockstep.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_unique_map_state_machine((pool, ops) in arb_scenario()) {
        let table: ConcurrentMap<Key, i32> = ConcurrentMap::new();
        run_unique_scenario(&table, &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: Same state-machine invariants as above, under worst-case
// collision behavior (constant hasher). Every key lands in one bucket,
// so this stresses chain scanning, in-chain unlinking, and rehashing of
// a single long chain.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_multi_map_with_collisions((pool, ops) in arb_scenario()) {
        let table: ConcurrentMultiMap<Key, i32, ConstBuildHasher> =
            ConcurrentMultiMap::with_hasher(ConstBuildHasher);
        run_multi_scenario(&table, &pool, ops)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_unique_map_with_collisions((pool, ops) in arb_scenario()) {
        let table: ConcurrentMap<Key, i32, ConstBuildHasher> =
            ConcurrentMap::with_hasher(ConstBuildHasher);
        run_unique_scenario(&table, &pool, ops)?;
    }
}
