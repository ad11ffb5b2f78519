//! RecursiveMap: a table whose colliding buckets hold child tables of the
//! same type.
//!
//! Every bucket is `Empty`, `Single(entry)` or `Nested(child)`. A child
//! sits one level deeper and slots by `floor(code * π * depth) mod n`. The
//! root hashes each key once; the 32-bit hash code travels down the levels
//! and is cached in the entry, so `K: Hash` never runs during promotion or
//! collapse.
//!
//! Capacity: the slot at every depth is a function of `code * π mod n`
//! alone. Two codes that land close together on that circle share a slot
//! at every depth up to `max_depth`, even when the codes differ, and the
//! second `put` fails with [`InsertError::DegenerateCollision`]. Within a
//! tolerance of roughly `1 / max_depth`, this is a birthday problem over
//! `n * max_depth` cells: with the defaults (32 buckets, depth 64) random
//! keys start being rejected after about a hundred or two inserts. Callers
//! must treat `Err` from `put` as an expected outcome; a larger
//! `bucket_count` or `max_depth` pushes the threshold out.
//!
//! Size bookkeeping: every table's `len` counts all entries beneath it. A
//! level bumps its own `len` only when the level below reports a new key,
//! and drops it only when the level below hands back a removed entry.

use crate::error::{ConfigError, InsertError};
use crate::hashing::hash_code;
use crate::map::Map;
use core::borrow::Borrow;
use core::f64::consts::PI;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashSet;
use log::{debug, warn};
use std::collections::hash_map::RandomState;

/// Largest accepted `max_depth`. Rejecting a collision costs one slot
/// computation per remaining level.
pub const MAX_DEPTH_LIMIT: usize = 1024;

/// Construction parameters for [`RecursiveMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecursiveConfig {
    /// Buckets per table, at every level. Must be > 0.
    pub bucket_count: usize,
    /// Deepest level a child table may sit at (root is 1). In
    /// `1..=MAX_DEPTH_LIMIT`.
    pub max_depth: usize,
}

impl Default for RecursiveConfig {
    fn default() -> Self {
        Self {
            bucket_count: 32,
            max_depth: 64,
        }
    }
}

impl RecursiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_count == 0 {
            return Err(ConfigError::ZeroBucketCount);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroMaxDepth);
        }
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigError::MaxDepthTooLarge(self.max_depth));
        }
        Ok(())
    }
}

/// `floor(hash * π * depth) mod bucket_count`.
#[inline]
fn slot_for(hash: u32, depth: usize, bucket_count: usize) -> usize {
    let scrambled = (f64::from(hash) * PI * depth as f64).floor() as u64;
    (scrambled % bucket_count as u64) as usize
}

/// Whether some depth in `from..=max_depth` puts the two codes in
/// different slots.
fn separable(a: u32, b: u32, from: usize, max_depth: usize, bucket_count: usize) -> bool {
    if a == b {
        return false;
    }
    (from..=max_depth).any(|d| slot_for(a, d, bucket_count) != slot_for(b, d, bucket_count))
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u32,
}

#[derive(Debug)]
enum Bucket<K, V> {
    Empty,
    Single(Entry<K, V>),
    Nested(Box<Table<K, V>>),
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Bucket::Empty
    }
}

impl<K, V> Bucket<K, V> {
    fn fill(&mut self, entry: Entry<K, V>) -> &mut Entry<K, V> {
        *self = Bucket::Single(entry);
        match self {
            Bucket::Single(e) => e,
            _ => unreachable!("bucket was just filled"),
        }
    }

    fn nest(&mut self, table: Box<Table<K, V>>) -> &mut Table<K, V> {
        *self = Bucket::Nested(table);
        match self {
            Bucket::Nested(t) => &mut **t,
            _ => unreachable!("bucket was just nested"),
        }
    }

    fn take_entry(&mut self) -> Option<Entry<K, V>> {
        match std::mem::take(self) {
            Bucket::Single(e) => Some(e),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Turn a nested bucket whose child holds at most one entry back into
    /// `Single`, or `Empty` when the child is empty.
    fn collapse_if_sparse(&mut self) {
        *self = match std::mem::take(self) {
            Bucket::Nested(child) if child.len <= 1 => {
                (*child).into_sole().map_or(Bucket::Empty, Bucket::Single)
            }
            other => other,
        };
    }
}

#[derive(Debug)]
struct Table<K, V> {
    buckets: Vec<Bucket<K, V>>,
    len: usize,
    depth: usize,
}

impl<K, V> Table<K, V> {
    fn new(depth: usize, bucket_count: usize) -> Self {
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Bucket::default);
        Self {
            buckets,
            len: 0,
            depth,
        }
    }

    fn with_entry(depth: usize, bucket_count: usize, entry: Entry<K, V>) -> Self {
        let mut table = Self::new(depth, bucket_count);
        let idx = table.slot(entry.hash);
        table.buckets[idx] = Bucket::Single(entry);
        table.len = 1;
        table
    }

    #[inline]
    fn slot(&self, hash: u32) -> usize {
        slot_for(hash, self.depth, self.buckets.len())
    }

    fn get<Q>(&self, hash: u32, q: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        match &self.buckets[self.slot(hash)] {
            Bucket::Empty => None,
            Bucket::Single(e) => (e.key.borrow() == q).then_some(e),
            Bucket::Nested(child) => child.get(hash, q),
        }
    }

    fn get_mut<Q>(&mut self, hash: u32, q: &Q) -> Option<&mut Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let idx = self.slot(hash);
        match &mut self.buckets[idx] {
            Bucket::Empty => None,
            Bucket::Single(e) => (e.key.borrow() == q).then_some(e),
            Bucket::Nested(child) => child.get_mut(hash, q),
        }
    }

    /// Returns the stored value and whether the key was new.
    fn insert(
        &mut self,
        entry: Entry<K, V>,
        max_depth: usize,
    ) -> Result<(&mut V, bool), InsertError>
    where
        K: Eq,
    {
        let idx = self.slot(entry.hash);
        let depth = self.depth;
        let bucket_count = self.buckets.len();
        let bucket = &mut self.buckets[idx];

        match std::mem::take(bucket) {
            Bucket::Empty => {
                self.len += 1;
                Ok((&mut bucket.fill(entry).value, true))
            }
            Bucket::Single(mut existing) if existing.key == entry.key => {
                existing.value = entry.value;
                Ok((&mut bucket.fill(existing).value, false))
            }
            Bucket::Single(existing) => {
                if !separable(existing.hash, entry.hash, depth + 1, max_depth, bucket_count) {
                    *bucket = Bucket::Single(existing);
                    warn!(
                        "recursive map: rejecting degenerate collision in slot {idx} at depth {depth}"
                    );
                    return Err(InsertError::DegenerateCollision { depth, max_depth });
                }
                debug!("recursive map: promoting slot {idx} at depth {depth}");
                let child = bucket.nest(Box::new(Table::with_entry(
                    depth + 1,
                    bucket_count,
                    existing,
                )));
                // Cannot fail: separable() found a depth that splits the pair.
                let (value, _) = child.insert(entry, max_depth)?;
                self.len += 1;
                Ok((value, true))
            }
            Bucket::Nested(child) => {
                let child = bucket.nest(child);
                let (value, added) = child.insert(entry, max_depth)?;
                if added {
                    self.len += 1;
                }
                Ok((value, added))
            }
        }
    }

    fn remove<Q>(&mut self, hash: u32, q: &Q) -> Option<Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let idx = self.slot(hash);
        let depth = self.depth;
        let bucket = &mut self.buckets[idx];
        let removed = match bucket {
            Bucket::Single(e) if e.key.borrow() == q => bucket.take_entry(),
            Bucket::Single(_) | Bucket::Empty => None,
            Bucket::Nested(child) => {
                let removed = child.remove(hash, q)?;
                if child.len <= 1 {
                    debug!("recursive map: collapsing slot {idx} at depth {depth}");
                    bucket.collapse_if_sparse();
                }
                Some(removed)
            }
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn into_sole(self) -> Option<Entry<K, V>> {
        self.buckets.into_iter().find_map(|b| match b {
            Bucket::Empty => None,
            Bucket::Single(e) => Some(e),
            Bucket::Nested(child) => (*child).into_sole(),
        })
    }

    fn deepest(&self) -> usize {
        self.buckets
            .iter()
            .filter_map(|b| match b {
                Bucket::Nested(child) => Some(child.deepest()),
                _ => None,
            })
            .max()
            .unwrap_or(self.depth)
    }

    fn walk(&self) -> Walk<'_, K, V> {
        Walk {
            stack: vec![self.buckets.iter()],
            remaining: self.len,
        }
    }

    /// Checks structure below this table and returns the entry count.
    #[cfg(test)]
    fn assert_invariants(&self) -> usize {
        let n = self.buckets.len();
        let mut total = 0;
        for (idx, b) in self.buckets.iter().enumerate() {
            match b {
                Bucket::Empty => {}
                Bucket::Single(e) => {
                    assert_eq!(slot_for(e.hash, self.depth, n), idx, "single in wrong slot");
                    total += 1;
                }
                Bucket::Nested(child) => {
                    assert_eq!(child.depth, self.depth + 1, "child depth");
                    assert_eq!(child.buckets.len(), n, "child bucket count");
                    assert!(child.len >= 2, "nested bucket left with {} entries", child.len);
                    for hash in child.walk().map(|(_, _, h)| h) {
                        assert_eq!(slot_for(hash, self.depth, n), idx, "nested entry in wrong slot");
                    }
                    total += child.assert_invariants();
                }
            }
        }
        assert_eq!(total, self.len, "len out of sync at depth {}", self.depth);
        total
    }
}

/// Hash map whose colliding buckets recurse into child tables.
pub struct RecursiveMap<K, V, S = RandomState> {
    hasher: S,
    root: Table<K, V>,
    config: RecursiveConfig,
}

impl<K, V> RecursiveMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_config(config: RecursiveConfig) -> Result<Self, ConfigError> {
        Self::with_config_and_hasher(config, Default::default())
    }
}

impl<K, V> Default for RecursiveMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> RecursiveMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        let config = RecursiveConfig::default();
        Self {
            hasher,
            root: Table::new(1, config.bucket_count),
            config,
        }
    }

    pub fn with_config_and_hasher(config: RecursiveConfig, hasher: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            hasher,
            root: Table::new(1, config.bucket_count),
            config,
        })
    }

    fn make_code<Q>(&self, q: &Q) -> u32
    where
        Q: ?Sized + Hash,
    {
        hash_code(self.hasher.hash_one(q))
    }

    pub fn config(&self) -> &RecursiveConfig {
        &self.config
    }

    /// Buckets per table; the same at every level.
    pub fn bucket_count(&self) -> usize {
        self.root.buckets.len()
    }

    /// Depth of the deepest live table; 1 when no bucket is nested.
    pub fn max_nesting_depth(&self) -> usize {
        self.root.deepest()
    }

    pub fn len(&self) -> usize {
        self.root.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.len == 0
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.root.get(self.make_code(q), q).map(|e| &e.value)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let code = self.make_code(q);
        self.root.get_mut(code, q).map(|e| &mut e.value)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(q).is_some()
    }

    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.iter().any(|(_, v)| v == value)
    }

    /// Store `value` under `key` and return a reference to the stored value.
    ///
    /// Overwriting keeps the entry in place and returns the new value. Fails
    /// with [`InsertError::DegenerateCollision`] when the key cannot be
    /// separated from an existing one within `max_depth` levels; the map is
    /// unchanged in that case.
    pub fn put(&mut self, key: K, value: V) -> Result<&mut V, InsertError> {
        let hash = self.make_code(&key);
        let max_depth = self.config.max_depth;
        let (value, _) = self.root.insert(Entry { key, value, hash }, max_depth)?;
        Ok(value)
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let code = self.make_code(q);
        self.root.remove(code, q).map(|e| (e.key, e.value))
    }

    pub fn clear(&mut self) {
        self.root = Table::new(1, self.config.bucket_count);
    }

    pub fn key_set(&self) -> HashSet<&K> {
        self.iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self) -> Vec<&V> {
        self.iter().map(|(_, v)| v).collect()
    }

    pub fn entry_set(&self) -> Vec<(&K, &V)> {
        self.iter().collect()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter(self.root.walk())
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            stack: vec![self.root.buckets.iter_mut()],
            remaining: self.root.len,
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert_eq!(self.root.depth, 1);
        for (k, _) in self.iter() {
            assert!(self.contains_key(k), "iterated key not reachable by lookup");
        }
        self.root.assert_invariants();
    }
}

// Depth-first walk yielding the cached hash code alongside each pair.
struct Walk<'a, K, V> {
    stack: Vec<core::slice::Iter<'a, Bucket<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Walk<'a, K, V> {
    type Item = (&'a K, &'a V, u32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                }
                Some(Bucket::Empty) => {}
                Some(Bucket::Single(e)) => {
                    self.remaining -= 1;
                    return Some((&e.key, &e.value, e.hash));
                }
                Some(Bucket::Nested(child)) => self.stack.push(child.buckets.iter()),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Iterator over `(&K, &V)` pairs of a [`RecursiveMap`], nested tables
/// included.
pub struct Iter<'a, K, V>(Walk<'a, K, V>);

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v, _)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over `(&K, &mut V)` pairs of a [`RecursiveMap`].
pub struct IterMut<'a, K, V> {
    stack: Vec<core::slice::IterMut<'a, Bucket<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                }
                Some(Bucket::Empty) => {}
                Some(Bucket::Single(e)) => {
                    self.remaining -= 1;
                    return Some((&e.key, &mut e.value));
                }
                Some(Bucket::Nested(child)) => self.stack.push(child.buckets.iter_mut()),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// Owning iterator over the entries of a [`RecursiveMap`].
pub struct IntoIter<K, V> {
    stack: Vec<std::vec::IntoIter<Bucket<K, V>>>,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                }
                Some(Bucket::Empty) => {}
                Some(Bucket::Single(e)) => {
                    self.remaining -= 1;
                    return Some((e.key, e.value));
                }
                Some(Bucket::Nested(child)) => {
                    let child = *child;
                    self.stack.push(child.buckets.into_iter());
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

impl<K, V, S> IntoIterator for RecursiveMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            remaining: self.root.len,
            stack: vec![self.root.buckets.into_iter()],
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a RecursiveMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut RecursiveMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<K, V, S> fmt::Debug for RecursiveMap<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Map<K, V> for RecursiveMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Error = InsertError;

    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        RecursiveMap::get(self, key)
    }

    fn put(&mut self, key: K, value: V) -> Result<&mut V, InsertError> {
        RecursiveMap::put(self, key, value)
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        RecursiveMap::remove(self, key)
    }

    fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        RecursiveMap::contains_value(self, value)
    }

    fn len(&self) -> usize {
        self.root.len
    }

    fn clear(&mut self) {
        RecursiveMap::clear(self)
    }

    fn key_set(&self) -> HashSet<&K> {
        RecursiveMap::key_set(self)
    }

    fn values(&self) -> Vec<&V> {
        RecursiveMap::values(self)
    }

    fn entry_set(&self) -> Vec<(&K, &V)> {
        RecursiveMap::entry_set(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::IdentityBuildHasher;
    use std::collections::{BTreeSet, HashMap};
    use std::hash::Hasher;
    use std::ops::RangeInclusive;

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
            7
        }
    }

    type IdMap = RecursiveMap<u32, u32, IdentityBuildHasher>;

    fn id_map() -> IdMap {
        RecursiveMap::with_hasher(IdentityBuildHasher)
    }

    /// First `count` keys (identity-hashed) sharing one slot at every depth in `depths`.
    fn keys_sharing_slots(depths: RangeInclusive<usize>, count: usize) -> Vec<u32> {
        let mut groups: HashMap<Vec<usize>, Vec<u32>> = HashMap::new();
        for k in 0u32.. {
            let sig: Vec<usize> = depths.clone().map(|d| slot_for(k, d, 32)).collect();
            let group = groups.entry(sig).or_default();
            group.push(k);
            if group.len() == count {
                return group.clone();
            }
        }
        unreachable!()
    }

    fn root_bucket<'a>(m: &'a IdMap, key: u32) -> &'a Bucket<u32, u32> {
        &m.root.buckets[slot_for(key, 1, m.bucket_count())]
    }

    /// Invariant: zero buckets, zero depth and an oversized depth are rejected
    /// with their own kinds.
    #[test]
    fn invalid_configs_rejected() {
        let zero_buckets = RecursiveConfig {
            bucket_count: 0,
            ..RecursiveConfig::default()
        };
        let zero_depth = RecursiveConfig {
            max_depth: 0,
            ..RecursiveConfig::default()
        };
        assert_eq!(
            RecursiveMap::<u32, u32>::with_config(zero_buckets).err(),
            Some(ConfigError::ZeroBucketCount)
        );
        assert_eq!(
            RecursiveMap::<u32, u32>::with_config(zero_depth).err(),
            Some(ConfigError::ZeroMaxDepth)
        );
        let too_deep = RecursiveConfig {
            max_depth: MAX_DEPTH_LIMIT + 1,
            ..RecursiveConfig::default()
        };
        assert_eq!(
            RecursiveMap::<u32, u32>::with_config(too_deep).err(),
            Some(ConfigError::MaxDepthTooLarge(MAX_DEPTH_LIMIT + 1))
        );
        let deepest = RecursiveConfig {
            max_depth: MAX_DEPTH_LIMIT,
            ..RecursiveConfig::default()
        };
        assert!(deepest.validate().is_ok());
        let m: RecursiveMap<u32, u32> = RecursiveMap::new();
        assert_eq!(m.bucket_count(), 32);
        assert_eq!(m.config().max_depth, 64);
    }

    /// Invariant: slot = floor(code * π * depth) mod buckets.
    #[test]
    fn slot_formula_scales_with_depth() {
        assert_eq!(slot_for(1, 1, 32), 3);
        assert_eq!(slot_for(33, 1, 32), 7);
        assert_eq!(slot_for(65, 1, 32), 12);
        assert_eq!(slot_for(1, 2, 32), 6);
        assert_eq!(slot_for(0, 5, 32), 0);
        assert_eq!(slot_for(u32::MAX, 64, 32), slot_for(u32::MAX, 64, 32));
    }

    /// Invariant: 1, 33 and 65 are each retrievable after insertion.
    #[test]
    fn one_thirty_three_sixty_five_retrievable() {
        let mut m = id_map();
        for k in [1, 33, 65] {
            assert_eq!(*m.put(k, k).unwrap(), k);
        }
        for k in [1, 33, 65] {
            assert_eq!(m.get(&k), Some(&k));
        }
        assert_eq!(m.len(), 3);
        m.assert_invariants();
    }

    /// Invariant: two keys sharing a root slot promote it to `Nested`, and
    /// both stay retrievable.
    #[test]
    fn collision_promotes_bucket() {
        let keys = keys_sharing_slots(1..=1, 2);
        let mut m = id_map();
        m.put(keys[0], 10).unwrap();
        assert!(matches!(root_bucket(&m, keys[0]), Bucket::Single(_)));
        m.put(keys[1], 20).unwrap();
        match root_bucket(&m, keys[0]) {
            Bucket::Nested(child) => {
                assert_eq!(child.depth, 2);
                assert_eq!(child.len, 2);
            }
            other => panic!("expected nested bucket, got {:?}", other),
        }
        assert_eq!(m.get(&keys[0]), Some(&10));
        assert_eq!(m.get(&keys[1]), Some(&20));
        assert_eq!(m.len(), 2);
        assert_eq!(m.max_nesting_depth(), 2);
        m.assert_invariants();
    }

    /// Invariant: keys sharing slots at depths 1 and 2 cause two successive
    /// promotions; every key stays retrievable.
    #[test]
    fn successive_promotions() {
        let keys = keys_sharing_slots(1..=2, 3);
        let mut m = id_map();
        for &k in &keys {
            m.put(k, k + 1).unwrap();
        }
        assert!(m.max_nesting_depth() >= 3);
        for &k in &keys {
            assert_eq!(m.get(&k), Some(&(k + 1)));
        }
        assert_eq!(m.len(), 3);
        m.assert_invariants();
    }

    /// Invariant: removing two of three colliding keys, in any order,
    /// collapses the bucket to `Single` holding the survivor.
    #[test]
    fn removal_collapses_to_single() {
        let keys = keys_sharing_slots(1..=1, 3);
        for survivor in 0..3 {
            for reverse in [false, true] {
                let mut m = id_map();
                for &k in &keys {
                    m.put(k, k * 2).unwrap();
                }
                let mut doomed: Vec<u32> = (0..3).filter(|&i| i != survivor).map(|i| keys[i]).collect();
                if reverse {
                    doomed.reverse();
                }
                for k in doomed {
                    assert_eq!(m.remove(&k), Some(k * 2));
                    m.assert_invariants();
                }
                let kept = keys[survivor];
                match root_bucket(&m, kept) {
                    Bucket::Single(e) => assert_eq!(e.key, kept),
                    other => panic!("expected single bucket, got {:?}", other),
                }
                assert_eq!(m.get(&kept), Some(&(kept * 2)));
                assert_eq!(m.len(), 1);
                assert_eq!(m.max_nesting_depth(), 1);
            }
        }
    }

    /// Invariant: a nested bucket drained completely ends up `Empty`.
    #[test]
    fn drained_nested_bucket_becomes_empty() {
        let keys = keys_sharing_slots(1..=2, 4);
        let mut m = id_map();
        for &k in &keys {
            m.put(k, k).unwrap();
        }
        for &k in &keys {
            assert_eq!(m.remove(&k), Some(k));
            m.assert_invariants();
        }
        assert!(matches!(root_bucket(&m, keys[0]), Bucket::Empty));
        assert!(m.is_empty());
        assert_eq!(m.max_nesting_depth(), 1);
    }

    /// Invariant: overwriting inside a nested table keeps `len` at every level
    /// and returns the new value.
    #[test]
    fn overwrite_in_nested_table() {
        let keys = keys_sharing_slots(1..=1, 2);
        let mut m = id_map();
        m.put(keys[0], 1).unwrap();
        m.put(keys[1], 2).unwrap();
        assert_eq!(*m.put(keys[1], 3).unwrap(), 3);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&keys[1]), Some(&3));
        m.assert_invariants();
    }

    /// Invariant: unequal keys with identical hash codes raise
    /// `DegenerateCollision` and leave the map unchanged.
    #[test]
    fn identical_hash_codes_rejected() {
        let mut m: RecursiveMap<String, i32, ConstBuildHasher> =
            RecursiveMap::with_hasher(ConstBuildHasher);
        m.put("a".to_string(), 1).unwrap();
        match m.put("b".to_string(), 2) {
            Err(InsertError::DegenerateCollision {
                depth: 1,
                max_depth: 64,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a"), Some(&1));
        assert!(!m.contains_key("b"));
        assert_eq!(m.max_nesting_depth(), 1);

        // Overwriting the resident key is still fine.
        assert_eq!(*m.put("a".to_string(), 5).unwrap(), 5);
        assert_eq!(m.len(), 1);
    }

    /// Invariant: distinct codes whose `code * π mod n` values sit close
    /// together share every slot up to the ceiling and are rejected; a
    /// deeper ceiling separates them.
    #[test]
    fn distinct_codes_can_be_inseparable() {
        let (a, b) = (113u32, 1702u32);
        assert!((1..=64).all(|d| slot_for(a, d, 32) == slot_for(b, d, 32)));
        assert!(!separable(a, b, 2, 64, 32));
        assert_eq!((2..=1024).find(|&d| slot_for(a, d, 32) != slot_for(b, d, 32)), Some(108));

        let mut m = id_map();
        m.put(a, 1).unwrap();
        assert_eq!(
            m.put(b, 2).err(),
            Some(InsertError::DegenerateCollision {
                depth: 1,
                max_depth: 64
            })
        );
        assert_eq!(m.len(), 1);
        m.assert_invariants();

        let mut deep: IdMap = RecursiveMap::with_config_and_hasher(
            RecursiveConfig {
                max_depth: 128,
                ..RecursiveConfig::default()
            },
            IdentityBuildHasher,
        )
        .unwrap();
        deep.put(a, 1).unwrap();
        deep.put(b, 2).unwrap();
        assert_eq!(deep.max_nesting_depth(), 108);
        assert_eq!(deep.get(&a), Some(&1));
        assert_eq!(deep.get(&b), Some(&2));
        deep.assert_invariants();

        assert_eq!(deep.remove(&a), Some(1));
        assert_eq!(deep.max_nesting_depth(), 1);
        deep.assert_invariants();
    }

    /// Invariant: equal codes are never separable, whatever the ceiling.
    #[test]
    fn equal_codes_never_separable() {
        assert!(!separable(7, 7, 2, MAX_DEPTH_LIMIT, 32));
        assert!(!separable(7, 7, 2, usize::MAX, 32));
        assert!(separable(1, 33, 1, 1, 32));
    }

    /// Invariant: with `max_depth = 1` any collision is an error, and a
    /// failed insert below the root leaves the nested table intact.
    #[test]
    fn depth_ceiling_is_enforced() {
        let keys = keys_sharing_slots(1..=1, 2);
        let mut flat: IdMap = RecursiveMap::with_config_and_hasher(
            RecursiveConfig {
                max_depth: 1,
                ..RecursiveConfig::default()
            },
            IdentityBuildHasher,
        )
        .unwrap();
        flat.put(keys[0], 0).unwrap();
        assert_eq!(
            flat.put(keys[1], 1).err(),
            Some(InsertError::DegenerateCollision {
                depth: 1,
                max_depth: 1
            })
        );
        assert_eq!(flat.len(), 1);
        flat.assert_invariants();

        // a and c share slots at depths 1 and 2; b leaves them at depth 2.
        let pair = keys_sharing_slots(1..=2, 2);
        let (a, c) = (pair[0], pair[1]);
        let b = (0u32..)
            .find(|&k| {
                k != a
                    && slot_for(k, 1, 32) == slot_for(a, 1, 32)
                    && slot_for(k, 2, 32) != slot_for(a, 2, 32)
            })
            .unwrap();
        let mut capped: IdMap = RecursiveMap::with_config_and_hasher(
            RecursiveConfig {
                max_depth: 2,
                ..RecursiveConfig::default()
            },
            IdentityBuildHasher,
        )
        .unwrap();
        capped.put(a, 0).unwrap();
        capped.put(b, 1).unwrap();
        assert_eq!(capped.max_nesting_depth(), 2);
        assert_eq!(
            capped.put(c, 2).err(),
            Some(InsertError::DegenerateCollision {
                depth: 2,
                max_depth: 2
            })
        );
        assert_eq!(capped.len(), 2);
        assert_eq!(capped.get(&a), Some(&0));
        assert_eq!(capped.get(&b), Some(&1));
        assert!(!capped.contains_key(&c));
        capped.assert_invariants();
    }

    /// Invariant: `len` equals the number of distinct keys across many
    /// promotions and collapses in a narrow table.
    #[test]
    fn size_tracks_entries_in_narrow_table() {
        let mut m: IdMap = RecursiveMap::with_config_and_hasher(
            RecursiveConfig {
                bucket_count: 4,
                ..RecursiveConfig::default()
            },
            IdentityBuildHasher,
        )
        .unwrap();
        let mut model = BTreeSet::new();
        for k in 0..200u32 {
            if m.put(k, k).is_ok() {
                model.insert(k);
            }
        }
        assert_eq!(m.len(), model.len());
        m.assert_invariants();
        for k in (0..200u32).step_by(3) {
            assert_eq!(m.remove(&k).is_some(), model.remove(&k));
        }
        assert_eq!(m.len(), model.len());
        m.assert_invariants();
        let keys: BTreeSet<u32> = m.key_set().into_iter().copied().collect();
        assert_eq!(keys, model);
    }

    /// Invariant: `clear` empties every level and keeps the bucket count.
    #[test]
    fn clear_resets_all_levels() {
        let keys = keys_sharing_slots(1..=1, 3);
        let mut m = id_map();
        for &k in &keys {
            m.put(k, k).unwrap();
        }
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.bucket_count(), 32);
        assert_eq!(m.max_nesting_depth(), 1);
        for &k in &keys {
            assert!(!m.contains_key(&k));
        }
    }

    /// Invariant: iteration flattens nested tables; each entry appears once.
    #[test]
    fn iteration_flattens_nested_tables() {
        let mut keys = keys_sharing_slots(1..=2, 3);
        keys.extend([1000, 2000]);
        let mut m = id_map();
        for &k in &keys {
            m.put(k, 1).unwrap();
        }
        assert_eq!(m.iter().len(), keys.len());
        let seen: BTreeSet<u32> = m.iter().map(|(k, _)| *k).collect();
        assert_eq!(seen, keys.iter().copied().collect::<BTreeSet<u32>>());
        assert_eq!(m.values().len(), keys.len());
        assert!(m.contains_value(&1));
        assert!(!m.contains_value(&2));

        for (k, v) in m.iter_mut() {
            *v = *k;
        }
        *m.get_mut(&1000).unwrap() += 1;
        assert_eq!(m.get(&1000), Some(&1001));
        assert_eq!(m.get(&keys[0]), Some(&keys[0]));

        let drained: BTreeSet<(u32, u32)> = m.into_iter().collect();
        assert_eq!(drained.len(), keys.len());
    }

    /// Invariant: `put_all` stops at the first degenerate collision with the
    /// earlier pairs already stored.
    #[test]
    fn put_all_stops_at_first_error() {
        let mut m: RecursiveMap<&'static str, i32, ConstBuildHasher> =
            RecursiveMap::with_hasher(ConstBuildHasher);
        let res = Map::put_all(&mut m, [("a", 1), ("a", 2), ("b", 3), ("c", 4)]);
        assert!(res.is_err());
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a"), Some(&2));
        assert_eq!(format!("{:?}", m), r#"{"a": 2}"#);
    }
}
