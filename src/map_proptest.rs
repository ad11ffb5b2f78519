#![cfg(test)]

// Property tests for both engines kept inside the crate so the internal
// invariant checks can run after every operation.

use crate::bucketing_map::{BucketingConfig, BucketingMap};
use crate::hashing::IdentityBuildHasher;
use crate::map::Map;
use crate::recursive_map::{RecursiveConfig, RecursiveMap};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

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

// Pool-indexed operations: indices shrink to earlier keys, the pool
// shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum Op {
    Put(usize, i32),
    Remove(usize),
    Get(usize),
    Clear,
    PutAll(Vec<(usize, i32)>),
    Snapshot,
}

fn arb_ops(pool_len: usize) -> impl Strategy<Value = Vec<Op>> {
    let idx = 0..pool_len;
    let op = prop_oneof![
        4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Put(i, v)),
        2 => idx.clone().prop_map(Op::Remove),
        2 => idx.clone().prop_map(Op::Get),
        1 => Just(Op::Clear),
        1 => proptest::collection::vec((idx.clone(), any::<i32>()), 0..6).prop_map(Op::PutAll),
        1 => Just(Op::Snapshot),
    ];
    proptest::collection::vec(op, 1..60)
}

fn arb_string_scenario() -> impl Strategy<Value = (Vec<Key>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let keys: Vec<Key> = pool.into_iter().map(Key).collect();
        arb_ops(keys.len()).prop_map(move |ops| (keys.clone(), ops))
    })
}

// Small integers under the identity hasher pile into few slots.
fn arb_int_scenario() -> impl Strategy<Value = (Vec<u32>, Vec<Op>)> {
    proptest::collection::vec(0u32..512, 1..=12).prop_flat_map(|pool| {
        arb_ops(pool.len()).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn snapshot<K, M>(sut: &M) -> HashMap<K, i32>
where
    K: Clone + Eq + Hash,
    M: Map<K, i32>,
{
    sut.entry_set()
        .into_iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

// State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - `put` returns the value just stored; failures only hit new keys and
//   leave the map untouched.
// - `get`/`contains_key`/`remove` agree with the model.
// - `put_all` applies a prefix of its batch (all of it on success).
// - Snapshots list each live entry exactly once.
// - `len`/`is_empty` parity with the model and engine invariants after each op.
fn run_state_machine<K, M>(
    sut: &mut M,
    pool: &[K],
    ops: Vec<Op>,
    check: impl Fn(&M),
) -> Result<(), TestCaseError>
where
    K: Clone + Eq + Hash + Ord + fmt::Debug,
    M: Map<K, i32>,
    M::Error: fmt::Debug,
{
    let mut model: HashMap<K, i32> = HashMap::new();

    for op in ops {
        match op {
            Op::Put(i, v) => {
                let k = pool[i].clone();
                match sut.put(k.clone(), v) {
                    Ok(stored) => {
                        prop_assert_eq!(*stored, v, "put must return the value just stored");
                        model.insert(k, v);
                    }
                    Err(e) => {
                        prop_assert!(!model.contains_key(&k), "overwrite failed: {:?}", e);
                    }
                }
            }
            Op::Remove(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.remove(k), model.remove(k));
            }
            Op::Get(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.get(k), model.get(k));
                prop_assert_eq!(sut.contains_key(k), model.contains_key(k));
            }
            Op::Clear => {
                sut.clear();
                model.clear();
            }
            Op::PutAll(pairs) => {
                let batch: Vec<(K, i32)> = pairs
                    .into_iter()
                    .map(|(i, v)| (pool[i].clone(), v))
                    .collect();
                let mut applied = vec![model.clone()];
                for (k, v) in &batch {
                    let mut next = applied[applied.len() - 1].clone();
                    next.insert(k.clone(), *v);
                    applied.push(next);
                }
                match sut.put_all(batch) {
                    Ok(()) => {
                        model = applied.pop().unwrap_or_default();
                        prop_assert_eq!(snapshot::<K, M>(&*sut), model.clone());
                    }
                    Err(_) => {
                        let actual = snapshot::<K, M>(&*sut);
                        prop_assert!(
                            applied.contains(&actual),
                            "put_all left a state that is no prefix of its batch"
                        );
                        model = actual;
                    }
                }
            }
            Op::Snapshot => {
                let keys: BTreeSet<K> = sut.key_set().into_iter().cloned().collect();
                prop_assert_eq!(keys, model.keys().cloned().collect::<BTreeSet<_>>());

                let mut values: Vec<i32> = sut.values().into_iter().copied().collect();
                let mut expected: Vec<i32> = model.values().copied().collect();
                values.sort_unstable();
                expected.sort_unstable();
                prop_assert_eq!(values, expected);

                let entries = sut.entry_set();
                prop_assert_eq!(entries.len(), model.len());
                for (k, v) in entries {
                    prop_assert_eq!(model.get(k), Some(v));
                }
                if let Some(v) = model.values().next() {
                    prop_assert!(sut.contains_value(v));
                }
            }
        }

        check(&*sut);
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_bucketing_state_machine((pool, ops) in arb_string_scenario()) {
        let mut sut: BucketingMap<Key, i32> = BucketingMap::with_config(BucketingConfig {
            initial_bucket_count: 2,
            preferred_bucket_size: 1,
            ..BucketingConfig::default()
        })
        .unwrap();
        run_state_machine(&mut sut, &pool, ops, |m| m.assert_invariants())?;
    }

    #[test]
    fn prop_recursive_state_machine((pool, ops) in arb_string_scenario()) {
        let mut sut: RecursiveMap<Key, i32> = RecursiveMap::new();
        run_state_machine(&mut sut, &pool, ops, |m| m.assert_invariants())?;
    }

    // One initial bucket, growth by 3, resize at full load.
    #[test]
    fn prop_bucketing_low_entropy((pool, ops) in arb_int_scenario()) {
        let mut sut: BucketingMap<u32, i32, IdentityBuildHasher> =
            BucketingMap::with_config_and_hasher(
                BucketingConfig {
                    initial_bucket_count: 1,
                    scaling_factor: 3,
                    preferred_bucket_size: 1,
                    load_factor: 1.0,
                },
                IdentityBuildHasher,
            )
            .unwrap();
        run_state_machine(&mut sut, &pool, ops, |m| m.assert_invariants())?;
    }

    // Two buckets per level and a shallow ceiling: promotions, collapses and
    // degenerate-collision rejections all show up.
    #[test]
    fn prop_recursive_low_entropy((pool, ops) in arb_int_scenario()) {
        let mut sut: RecursiveMap<u32, i32, IdentityBuildHasher> =
            RecursiveMap::with_config_and_hasher(
                RecursiveConfig {
                    bucket_count: 2,
                    max_depth: 6,
                },
                IdentityBuildHasher,
            )
            .unwrap();
        run_state_machine(&mut sut, &pool, ops, |m| m.assert_invariants())?;
    }
}
