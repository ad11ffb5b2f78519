//! The map contract both engines implement.

use core::borrow::Borrow;
use core::hash::Hash;
use hashbrown::HashSet;

/// Key/value map over `K: Eq + Hash`.
///
/// Snapshots (`key_set`, `values`, `entry_set`) are freshly collected on
/// every call and carry no ordering guarantee.
pub trait Map<K, V>
where
    K: Eq + Hash,
{
    /// Error returned by `put`.
    type Error;

    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq;

    /// Store `value` under `key`, overwriting any previous value in place.
    ///
    /// Returns the value just stored, not the one it replaced.
    fn put(&mut self, key: K, value: V) -> Result<&mut V, Self::Error>;

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq;

    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).is_some()
    }

    fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry and return to the configured bucket count.
    fn clear(&mut self);

    fn key_set(&self) -> HashSet<&K>;

    /// All values; duplicates are kept.
    fn values(&self) -> Vec<&V>;

    fn entry_set(&self) -> Vec<(&K, &V)>;

    /// `put` every pair from `entries` in iteration order. Stops at the
    /// first error; pairs stored before it stay stored.
    fn put_all<I>(&mut self, entries: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in entries {
            self.put(k, v)?;
        }
        Ok(())
    }
}
