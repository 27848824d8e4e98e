//! Hash-backed key-to-object tables with reference-counted entries.
//!
//! Both shapes sit on the sharded [`HashTable`] engine in manual-growth
//! mode: the wrapper checks capacity and grows the engine *before* any
//! stripe lock is taken, so an insert never escalates to the all-stripe
//! rehash while holding a stripe.
//!
//! Unlike the ordered maps, the unique hash map refuses a duplicate key
//! outright: the caller gets [`InsertError::DuplicateKey`], the offered
//! object is dropped, and the resident entry's use-count is untouched.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use log::error;

use crate::error::InsertError;
use crate::handle::{ObjectHandle, Released, SlotIdentity, SlotTable};
use crate::hash_table::{HashTable, TableEntry};
use crate::slot::{EntryId, Slot};

/// Engine entry of the managed hash maps: shares the slot with handles
/// and hashes by the key stored inside it.
pub(crate) struct KeySlot<K, V>(pub(crate) Arc<Slot<K, V>>);

impl<K, V> Clone for KeySlot<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K: Hash + Eq, V> TableEntry for KeySlot<K, V> {
    type Key = K;

    fn key(&self) -> &K {
        self.0.key()
    }
}

struct HashMapCore<K, V, S> {
    table: HashTable<KeySlot<K, V>, S, false>,
}

impl<K, V, S> SlotTable<K, V> for HashMapCore<K, V, S>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn is_multi(&self) -> bool {
        false
    }

    fn is_keyed(&self) -> bool {
        true
    }

    fn remove_expired(&self, identity: SlotIdentity<'_, K, V>) -> Released {
        let SlotIdentity::Key(key) = identity else {
            return Released::Retained;
        };
        // The count re-check runs under the stripe's write lock; a
        // lookup that revived the entry in the meantime fails it.
        match self.table.erase_if(key, |entry| entry.0.use_count() == 0) {
            Some(_) => Released::Erased,
            None => Released::Retained,
        }
    }
}

/// Sharded unique-key table of reference-counted objects.
///
/// Inserting a taken key is refused instead of aliasing the resident
/// entry. An entry leaves the map when its last handle is released, and
/// handles stay valid across the map's internal rehashes.
pub struct ManagedHashMap<K, V, S = RandomState> {
    core: Arc<HashMapCore<K, V, S>>,
}

impl<K, V> ManagedHashMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> ManagedHashMap<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            core: Arc::new(HashMapCore {
                table: HashTable::with_manual_growth(capacity, hasher),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<K, V>> {
        Arc::clone(&self.core) as _
    }

    /// Doubles the engine when the next insert would fill it. Runs before
    /// any stripe lock is taken.
    fn grow_for_insert(&self) {
        let buckets = self.core.table.bucket_count();
        if self.core.table.len() + 1 >= buckets {
            self.core.table.rehash(buckets.saturating_mul(2));
        }
    }

    /// Inserts `key -> object` and returns the first handle to the new
    /// entry.
    ///
    /// A taken key is refused: `object` is dropped, and the resident
    /// entry — including its use-count — stays untouched.
    pub fn insert(&self, key: K, object: V) -> Result<ObjectHandle<K, V>, InsertError> {
        self.grow_for_insert();
        let slot = Arc::new(Slot::new(key, object));
        let host = self.host();
        self.core
            .table
            .insert_entry_with(KeySlot(slot), |entry| {
                // Minted before the stripe lock drops: the entry is never
                // visible at count zero.
                ObjectHandle::mint(host, Arc::clone(&entry.0))
            })
            .ok_or(InsertError::DuplicateKey)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core
            .table
            .with_match(key, |entry| ObjectHandle::mint(host, Arc::clone(&entry.0)))
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.contains(key)
    }

    /// Number of entries under `key`: zero or one.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.count(key)
    }

    pub fn use_count<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_match(key, |entry| entry.0.use_count())
    }

    pub fn len(&self) -> usize {
        self.core.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current engine bucket count. Monotonically non-decreasing.
    pub fn bucket_count(&self) -> usize {
        self.core.table.bucket_count()
    }

    /// Grows the engine so `entries` entries fit without rehashing.
    pub fn reserve(&self, entries: usize) {
        self.core.table.reserve(entries);
    }
}

impl<K, V> Default for ManagedHashMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Drop for ManagedHashMap<K, V, S> {
    fn drop(&mut self) {
        let remaining = self.core.table.len();
        if remaining != 0 {
            error!("managed hash map dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

struct HashMultiMapCore<K, V, S> {
    table: HashTable<KeySlot<K, V>, S, true>,
}

impl<K, V, S> SlotTable<K, V> for HashMultiMapCore<K, V, S>
where
    K: Hash + Eq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn is_multi(&self) -> bool {
        true
    }

    fn is_keyed(&self) -> bool {
        true
    }

    fn remove_expired(&self, identity: SlotIdentity<'_, K, V>) -> Released {
        let SlotIdentity::KeyAt(key, id) = identity else {
            return Released::Retained;
        };
        let removed = self.table.erase_if(key, |entry| {
            EntryId::of(&entry.0) == id && entry.0.use_count() == 0
        });
        match removed {
            Some(_) => Released::Erased,
            None => Released::Retained,
        }
    }
}

/// Sharded table that keeps every entry inserted under a key.
///
/// Equal keys accumulate; lookups see the newest entry for a key first.
/// Entries release individually, addressed by entry identity.
pub struct ManagedHashMultiMap<K, V, S = RandomState> {
    core: Arc<HashMultiMapCore<K, V, S>>,
}

impl<K, V> ManagedHashMultiMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> ManagedHashMultiMap<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            core: Arc::new(HashMultiMapCore {
                table: HashTable::with_manual_growth(capacity, hasher),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<K, V>> {
        Arc::clone(&self.core) as _
    }

    fn grow_for_insert(&self) {
        let buckets = self.core.table.bucket_count();
        if self.core.table.len() + 1 >= buckets {
            self.core.table.rehash(buckets.saturating_mul(2));
        }
    }

    /// Stores `object` as a new entry under `key`, even when the key is
    /// already present.
    pub fn insert(&self, key: K, object: V) -> ObjectHandle<K, V> {
        self.grow_for_insert();
        let slot = Arc::new(Slot::new(key, object));
        let host = self.host();
        self.core.table.insert_entry_with(KeySlot(slot), |entry| {
            ObjectHandle::mint(host, Arc::clone(&entry.0))
        })
    }

    /// Handle to the newest entry under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core
            .table
            .with_match(key, |entry| ObjectHandle::mint(host, Arc::clone(&entry.0)))
    }

    /// Handle to the entry under `key` with the given identity.
    pub fn get_at<Q>(&self, key: &Q, id: EntryId) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core.table.with_first(key, |entry| {
            (EntryId::of(&entry.0) == id)
                .then(|| ObjectHandle::mint(Arc::clone(&host), Arc::clone(&entry.0)))
        })
    }

    /// Handles to every entry under `key`, newest first.
    pub fn get_all<Q>(&self, key: &Q) -> Vec<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core.table.with_matches(key, |entry| {
            ObjectHandle::mint(Arc::clone(&host), Arc::clone(&entry.0))
        })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.contains(key)
    }

    /// Number of entries under `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.count(key)
    }

    /// Use-count of the newest entry under `key`. With several entries
    /// under one key the value is entry-specific, not a key aggregate.
    pub fn use_count<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_match(key, |entry| entry.0.use_count())
    }

    /// Use-count of the entry under `key` with the given identity.
    pub fn use_count_at<Q>(&self, key: &Q, id: EntryId) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_first(key, |entry| {
            (EntryId::of(&entry.0) == id).then(|| entry.0.use_count())
        })
    }

    /// Use-counts of every entry under `key`, newest first.
    pub fn use_counts<Q>(&self, key: &Q) -> Vec<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_matches(key, |entry| entry.0.use_count())
    }

    pub fn len(&self) -> usize {
        self.core.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.core.table.bucket_count()
    }

    pub fn reserve(&self, entries: usize) {
        self.core.table.reserve(entries);
    }
}

impl<K, V> Default for ManagedHashMultiMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Drop for ManagedHashMultiMap<K, V, S> {
    fn drop(&mut self) {
        let remaining = self.core.table.len();
        if remaining != 0 {
            error!("managed hash multi map dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a duplicate key is refused with an error; the resident
    /// entry and its use-count are left exactly as they were.
    #[test]
    fn duplicate_key_is_refused_not_aliased() {
        let map = ManagedHashMap::new();
        let first = map.insert("key".to_owned(), 1u32).unwrap();
        assert_eq!(first.use_count(), 1);

        let refused = map.insert("key".to_owned(), 2u32);
        assert_eq!(refused.unwrap_err(), InsertError::DuplicateKey);
        assert_eq!(first.use_count(), 1);
        assert_eq!(*map.get("key").unwrap().object(), 1);
        assert_eq!(map.len(), 1);
        drop(first);
        assert!(map.is_empty());
    }

    /// Invariant: the wrapper grows the engine ahead of the fill line and
    /// every handle stays valid across the rehash.
    #[test]
    fn growth_preserves_live_handles() {
        let map = ManagedHashMap::new();
        let initial_buckets = map.bucket_count();
        let handles: Vec<_> = (0..initial_buckets as u64 + 50)
            .map(|key| map.insert(key, key * 2).unwrap())
            .collect();
        assert!(map.bucket_count() > initial_buckets);
        for handle in &handles {
            assert_eq!(*handle.object(), handle.key() * 2);
            assert_eq!(handle.use_count(), 1);
        }
        assert_eq!(map.len(), handles.len());
        drop(handles);
        assert!(map.is_empty());
    }

    /// Invariant: multi-map entries under one key carry independent
    /// counts; the newest entry answers plain lookups.
    #[test]
    fn multi_key_entries_are_independent() {
        let map = ManagedHashMultiMap::new();
        let first = map.insert("alpha".to_owned(), 1u32);
        let second = map.insert("alpha".to_owned(), 2u32);
        assert_eq!(map.count("alpha"), 2);

        let newest = map.get("alpha").unwrap();
        assert_eq!(newest.entry_id(), second.entry_id());
        assert_eq!(map.use_counts("alpha"), vec![2, 1]);
        assert_eq!(map.use_count_at("alpha", first.entry_id()), Some(1));
        drop(newest);

        drop(second);
        assert_eq!(map.count("alpha"), 1);
        drop(first);
        assert!(!map.contains("alpha"));
    }

    /// Invariant: identity lookup revives exactly the addressed entry.
    #[test]
    fn identity_lookup_revives_one_entry() {
        let map = ManagedHashMultiMap::new();
        let a = map.insert(1u8, "a".to_owned());
        let b = map.insert(1u8, "b".to_owned());
        let picked = map.get_at(&1, a.entry_id()).unwrap();
        assert_eq!(picked.object(), "a");
        assert_eq!(picked.use_count(), 2);
        assert_eq!(b.use_count(), 1);
        assert!(map.get_at(&2, a.entry_id()).is_none());
        drop((a, b, picked));
        assert!(map.is_empty());
    }
}
