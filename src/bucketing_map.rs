//! BucketingMap: separate chaining over a growable array of lazily
//! allocated chains.

use crate::error::ConfigError;
use crate::map::Map;
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashSet;
use log::debug;
use std::collections::hash_map::RandomState;

/// Construction parameters for [`BucketingMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BucketingConfig {
    /// Bucket count at construction and after `clear()`. Must be > 0.
    pub initial_bucket_count: usize,
    /// Multiplier applied to the bucket count on resize. Must be > 1.
    pub scaling_factor: usize,
    /// Floor each bucket contributes to the capacity estimate. Must be > 0.
    pub preferred_bucket_size: usize,
    /// Resize once `len / estimated capacity` exceeds this. In `(0, 1]`.
    pub load_factor: f64,
}

impl Default for BucketingConfig {
    fn default() -> Self {
        Self {
            initial_bucket_count: 32,
            scaling_factor: 2,
            preferred_bucket_size: 5,
            load_factor: 0.75,
        }
    }
}

impl BucketingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_bucket_count == 0 {
            return Err(ConfigError::ZeroBucketCount);
        }
        if self.scaling_factor <= 1 {
            return Err(ConfigError::ScalingFactorTooSmall(self.scaling_factor));
        }
        if self.preferred_bucket_size == 0 {
            return Err(ConfigError::ZeroPreferredBucketSize);
        }
        // NaN fails both comparisons.
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(ConfigError::LoadFactorOutOfRange(self.load_factor));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

type Chain<K, V> = Vec<Entry<K, V>>;

fn empty_chains<K, V>(count: usize) -> Vec<Option<Chain<K, V>>> {
    let mut chains = Vec::with_capacity(count);
    chains.resize_with(count, || None);
    chains
}

/// Hash map resolving collisions by chaining, with a resize heuristic that
/// treats sparse buckets as if they held `preferred_bucket_size` entries.
pub struct BucketingMap<K, V, S = RandomState> {
    hasher: S,
    buckets: Vec<Option<Chain<K, V>>>,
    len: usize,
    // Sum over all buckets of max(chain length, preferred_bucket_size).
    estimated_capacity: usize,
    config: BucketingConfig,
}

impl<K, V> BucketingMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_config(config: BucketingConfig) -> Result<Self, ConfigError> {
        Self::with_config_and_hasher(config, Default::default())
    }
}

impl<K, V> Default for BucketingMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> BucketingMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_parts(BucketingConfig::default(), hasher)
    }

    pub fn with_config_and_hasher(config: BucketingConfig, hasher: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(config, hasher))
    }

    fn from_parts(config: BucketingConfig, hasher: S) -> Self {
        Self {
            hasher,
            buckets: empty_chains(config.initial_bucket_count),
            len: 0,
            estimated_capacity: config
                .initial_bucket_count
                .saturating_mul(config.preferred_bucket_size),
            config,
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    #[inline]
    fn index_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    pub fn config(&self) -> &BucketingConfig {
        &self.config
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.index_of(self.make_hash(q));
        self.buckets[idx]
            .as_ref()?
            .iter()
            .find(|e| e.key.borrow() == q)
            .map(|e| &e.value)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = self.index_of(self.make_hash(q));
        self.buckets[idx]
            .as_mut()?
            .iter_mut()
            .find(|e| e.key.borrow() == q)
            .map(|e| &mut e.value)
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
    /// An existing key keeps its entry and has its value overwritten; the
    /// returned reference then points at the new value. The old value is
    /// dropped, not returned.
    pub fn put(&mut self, key: K, value: V) -> &mut V {
        let hash = self.make_hash(&key);
        let mut idx = self.index_of(hash);

        let existing = self.buckets[idx]
            .as_ref()
            .and_then(|chain| chain.iter().position(|e| e.key == key));
        if let Some(pos) = existing {
            let entry = &mut self.buckets[idx].get_or_insert_with(Vec::new)[pos];
            entry.value = value;
            return &mut entry.value;
        }

        let chain_len = self.buckets[idx].as_ref().map_or(0, Vec::len);
        if self.overloaded_after_push(chain_len) {
            self.resize();
            idx = self.index_of(hash);
        }

        let preferred = self.config.preferred_bucket_size;
        let chain = self.buckets[idx].get_or_insert_with(Vec::new);
        let pos = chain.len();
        chain.push(Entry { key, value, hash });
        self.len += 1;
        self.estimated_capacity += (pos + 1).max(preferred) - pos.max(preferred);
        &mut chain[pos].value
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
        let idx = self.index_of(self.make_hash(q));
        let preferred = self.config.preferred_bucket_size;
        let chain = self.buckets[idx].as_mut()?;
        let pos = chain.iter().position(|e| e.key.borrow() == q)?;
        let before = chain.len();
        let entry = chain.swap_remove(pos);
        self.len -= 1;
        self.estimated_capacity -= before.max(preferred) - (before - 1).max(preferred);
        Some((entry.key, entry.value))
    }

    pub fn clear(&mut self) {
        let count = self.config.initial_bucket_count;
        self.buckets = empty_chains(count);
        self.len = 0;
        self.estimated_capacity = count.saturating_mul(self.config.preferred_bucket_size);
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

    // Evaluated against the table as it will be once one more entry is
    // appended to a chain currently holding `chain_len` entries.
    fn overloaded_after_push(&self, chain_len: usize) -> bool {
        let preferred = self.config.preferred_bucket_size;
        let capacity = self.estimated_capacity - chain_len.max(preferred)
            + (chain_len + 1).max(preferred);
        (self.len + 1) as f64 / capacity as f64 > self.config.load_factor
    }

    fn resize(&mut self) {
        let old_count = self.buckets.len();
        let Some(new_count) = old_count.checked_mul(self.config.scaling_factor) else {
            debug!("bucketing map: bucket count {old_count} cannot grow further");
            return;
        };

        let mut fresh = empty_chains(new_count);
        for entry in std::mem::take(&mut self.buckets)
            .into_iter()
            .flatten()
            .flatten()
        {
            // Cached hash: K: Hash is never called during a resize.
            let idx = (entry.hash % new_count as u64) as usize;
            fresh[idx].get_or_insert_with(Vec::new).push(entry);
        }
        self.buckets = fresh;
        self.estimated_capacity = self.sum_capacity();
        debug!(
            "bucketing map: resized {old_count} -> {new_count} buckets ({} entries)",
            self.len
        );
    }

    fn sum_capacity(&self) -> usize {
        let preferred = self.config.preferred_bucket_size;
        self.buckets
            .iter()
            .map(|c| c.as_ref().map_or(0, Vec::len).max(preferred))
            .sum()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            chains: self.buckets.iter(),
            chain: <&[Entry<K, V>]>::default().iter(),
            remaining: self.len,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            chains: self.buckets.iter_mut(),
            chain: <&mut [Entry<K, V>]>::default().iter_mut(),
            remaining: self.len,
        }
    }

    /// Panics if any structural invariant is broken.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let mut total = 0;
        for (idx, chain) in self.buckets.iter().enumerate() {
            for e in chain.iter().flatten() {
                assert_eq!(self.index_of(e.hash), idx, "entry in wrong bucket");
                assert_eq!(self.make_hash(&e.key), e.hash, "stale cached hash");
                total += 1;
            }
        }
        assert_eq!(total, self.len, "len out of sync with chains");
        assert_eq!(self.estimated_capacity, self.sum_capacity());
    }
}

/// Iterator over `(&K, &V)` pairs of a [`BucketingMap`].
pub struct Iter<'a, K, V> {
    chains: core::slice::Iter<'a, Option<Chain<K, V>>>,
    chain: core::slice::Iter<'a, Entry<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.chain.next() {
                self.remaining -= 1;
                return Some((&e.key, &e.value));
            }
            self.chain = self.chains.next()?.as_deref().unwrap_or_default().iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over `(&K, &mut V)` pairs of a [`BucketingMap`].
pub struct IterMut<'a, K, V> {
    chains: core::slice::IterMut<'a, Option<Chain<K, V>>>,
    chain: core::slice::IterMut<'a, Entry<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.chain.next() {
                self.remaining -= 1;
                return Some((&e.key, &mut e.value));
            }
            self.chain = self
                .chains
                .next()?
                .as_deref_mut()
                .unwrap_or_default()
                .iter_mut();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// Owning iterator over the entries of a [`BucketingMap`].
pub struct IntoIter<K, V> {
    chains: std::vec::IntoIter<Option<Chain<K, V>>>,
    chain: std::vec::IntoIter<Entry<K, V>>,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.chain.next() {
                self.remaining -= 1;
                return Some((e.key, e.value));
            }
            self.chain = self.chains.next()?.unwrap_or_default().into_iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

impl<K, V, S> IntoIterator for BucketingMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            chains: self.buckets.into_iter(),
            chain: Vec::new().into_iter(),
            remaining: self.len,
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a BucketingMap<K, V, S>
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

impl<'a, K, V, S> IntoIterator for &'a mut BucketingMap<K, V, S>
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

impl<K, V, S> Extend<(K, V)> for BucketingMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.put(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for BucketingMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_hasher(S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, S> fmt::Debug for BucketingMap<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Map<K, V> for BucketingMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Error = Infallible;

    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        BucketingMap::get(self, key)
    }

    fn put(&mut self, key: K, value: V) -> Result<&mut V, Infallible> {
        Ok(BucketingMap::put(self, key, value))
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        BucketingMap::remove(self, key)
    }

    fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        BucketingMap::contains_value(self, value)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        BucketingMap::clear(self)
    }

    fn key_set(&self) -> HashSet<&K> {
        BucketingMap::key_set(self)
    }

    fn values(&self) -> Vec<&V> {
        BucketingMap::values(self)
    }

    fn entry_set(&self) -> Vec<(&K, &V)> {
        BucketingMap::entry_set(self)
    }
}
