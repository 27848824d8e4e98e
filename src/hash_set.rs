//! Hash-backed value-keyed tables with reference-counted entries.
//!
//! The stored value is its own hash key. Like the hash maps, these run
//! the sharded engine in manual-growth mode and grow it before taking any
//! stripe lock; like them, the unique shape refuses duplicates rather
//! than aliasing the resident entry.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use log::error;

use crate::error::InsertError;
use crate::handle::{ObjectHandle, Released, SlotIdentity, SlotTable, ValueHandle};
use crate::hash_table::{HashTable, TableEntry};
use crate::slot::{EntryId, Slot};

/// Engine entry of the managed hash sets: hashes by the payload itself.
struct ValueSlot<T>(Arc<Slot<(), T>>);

impl<T> Clone for ValueSlot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Hash + Eq> TableEntry for ValueSlot<T> {
    type Key = T;

    fn key(&self) -> &T {
        self.0.object()
    }
}

struct HashSetCore<T, S> {
    table: HashTable<ValueSlot<T>, S, false>,
}

impl<T, S> SlotTable<(), T> for HashSetCore<T, S>
where
    T: Hash + Eq + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn is_multi(&self) -> bool {
        false
    }

    fn is_keyed(&self) -> bool {
        false
    }

    fn remove_expired(&self, identity: SlotIdentity<'_, (), T>) -> Released {
        let SlotIdentity::Value(value) = identity else {
            return Released::Retained;
        };
        match self.table.erase_if(value, |entry| entry.0.use_count() == 0) {
            Some(_) => Released::Erased,
            None => Released::Retained,
        }
    }
}

/// Sharded unique-value set of reference-counted objects.
///
/// Inserting a value equal to a resident one is refused. An entry leaves
/// the set when its last handle is released.
pub struct ManagedHashSet<T, S = RandomState> {
    core: Arc<HashSetCore<T, S>>,
}

impl<T> ManagedHashSet<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<T, S> ManagedHashSet<T, S>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            core: Arc::new(HashSetCore {
                table: HashTable::with_manual_growth(capacity, hasher),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<(), T>> {
        Arc::clone(&self.core) as _
    }

    fn grow_for_insert(&self) {
        let buckets = self.core.table.bucket_count();
        if self.core.table.len() + 1 >= buckets {
            self.core.table.rehash(buckets.saturating_mul(2));
        }
    }

    /// Inserts `object` and returns the first handle to the new entry.
    /// An equal resident value is refused: `object` is dropped and the
    /// resident entry's use-count stays untouched.
    pub fn insert(&self, object: T) -> Result<ValueHandle<T>, InsertError> {
        self.grow_for_insert();
        let slot = Arc::new(Slot::new((), object));
        let host = self.host();
        self.core
            .table
            .insert_entry_with(ValueSlot(slot), |entry| {
                ObjectHandle::mint(host, Arc::clone(&entry.0))
            })
            .ok_or(InsertError::DuplicateKey)
    }

    pub fn get<Q>(&self, value: &Q) -> Option<ValueHandle<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core
            .table
            .with_match(value, |entry| ObjectHandle::mint(host, Arc::clone(&entry.0)))
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.contains(value)
    }

    /// Number of entries equal to `value`: zero or one.
    pub fn count<Q>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.count(value)
    }

    pub fn use_count<Q>(&self, value: &Q) -> Option<u32>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_match(value, |entry| entry.0.use_count())
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

impl<T> Default for ManagedHashSet<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Drop for ManagedHashSet<T, S> {
    fn drop(&mut self) {
        let remaining = self.core.table.len();
        if remaining != 0 {
            error!("managed hash set dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

struct HashMultiSetCore<T, S> {
    table: HashTable<ValueSlot<T>, S, true>,
}

impl<T, S> SlotTable<(), T> for HashMultiSetCore<T, S>
where
    T: Hash + Eq + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn is_multi(&self) -> bool {
        true
    }

    fn is_keyed(&self) -> bool {
        false
    }

    fn remove_expired(&self, identity: SlotIdentity<'_, (), T>) -> Released {
        let SlotIdentity::ValueAt(value, id) = identity else {
            return Released::Retained;
        };
        let removed = self.table.erase_if(value, |entry| {
            EntryId::of(&entry.0) == id && entry.0.use_count() == 0
        });
        match removed {
            Some(_) => Released::Erased,
            None => Released::Retained,
        }
    }
}

/// Sharded collection that keeps equal values as separate entries.
pub struct ManagedHashMultiSet<T, S = RandomState> {
    core: Arc<HashMultiSetCore<T, S>>,
}

impl<T> ManagedHashMultiSet<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<T, S> ManagedHashMultiSet<T, S>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            core: Arc::new(HashMultiSetCore {
                table: HashTable::with_manual_growth(capacity, hasher),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<(), T>> {
        Arc::clone(&self.core) as _
    }

    fn grow_for_insert(&self) {
        let buckets = self.core.table.bucket_count();
        if self.core.table.len() + 1 >= buckets {
            self.core.table.rehash(buckets.saturating_mul(2));
        }
    }

    /// Stores `object` as a new entry, next to any equal ones.
    pub fn insert(&self, object: T) -> ValueHandle<T> {
        self.grow_for_insert();
        let slot = Arc::new(Slot::new((), object));
        let host = self.host();
        self.core.table.insert_entry_with(ValueSlot(slot), |entry| {
            ObjectHandle::mint(host, Arc::clone(&entry.0))
        })
    }

    /// Handle to the newest entry equal to `value`.
    pub fn get<Q>(&self, value: &Q) -> Option<ValueHandle<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core
            .table
            .with_match(value, |entry| ObjectHandle::mint(host, Arc::clone(&entry.0)))
    }

    /// Handle to the entry equal to `value` with the given identity.
    pub fn get_at<Q>(&self, value: &Q, id: EntryId) -> Option<ValueHandle<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core.table.with_first(value, |entry| {
            (EntryId::of(&entry.0) == id)
                .then(|| ObjectHandle::mint(Arc::clone(&host), Arc::clone(&entry.0)))
        })
    }

    /// Handles to every entry equal to `value`, newest first.
    pub fn get_all<Q>(&self, value: &Q) -> Vec<ValueHandle<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let host = self.host();
        self.core.table.with_matches(value, |entry| {
            ObjectHandle::mint(Arc::clone(&host), Arc::clone(&entry.0))
        })
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.contains(value)
    }

    /// Number of entries equal to `value`.
    pub fn count<Q>(&self, value: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.count(value)
    }

    /// Use-counts of every entry equal to `value`, newest first.
    pub fn use_counts<Q>(&self, value: &Q) -> Vec<u32>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.table.with_matches(value, |entry| entry.0.use_count())
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

impl<T> Default for ManagedHashMultiSet<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Drop for ManagedHashMultiSet<T, S> {
    fn drop(&mut self) {
        let remaining = self.core.table.len();
        if remaining != 0 {
            error!("managed hash multi set dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}
