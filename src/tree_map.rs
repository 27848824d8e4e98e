//! Ordered key-to-object tables with reference-counted entries.
//!
//! Both shapes sit on a `BTreeMap` behind one [`RwLock`]. The unique map
//! aliases the resident entry when a duplicate key is inserted — the
//! caller gets another handle to the object that is already there. The
//! multi map keeps an equal range per key and releases its entries
//! individually, addressed by entry identity.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::error;
use parking_lot::RwLock;

use crate::handle::{ObjectHandle, Released, SlotIdentity, SlotTable};
use crate::slot::{EntryId, Slot};

struct MapCore<K, V> {
    entries: RwLock<BTreeMap<K, Arc<Slot<K, V>>>>,
}

impl<K, V> SlotTable<K, V> for MapCore<K, V>
where
    K: Ord + Send + Sync,
    V: Send + Sync,
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
        let mut entries = self.entries.write();
        let expired = entries
            .get(key)
            .is_some_and(|slot| slot.use_count() == 0);
        if !expired {
            // Revived by a lookup between the decrement and this lock,
            // or already erased by a racing release.
            return Released::Retained;
        }
        entries.remove(key);
        Released::Erased
    }
}

/// Ordered unique-key table of reference-counted objects.
///
/// Inserting an existing key does not replace the resident object; it
/// hands out another handle to it. An entry leaves the map when its last
/// handle is released.
pub struct ManagedMap<K, V> {
    core: Arc<MapCore<K, V>>,
}

impl<K, V> ManagedMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            core: Arc::new(MapCore {
                entries: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<K, V>> {
        Arc::clone(&self.core) as _
    }

    /// Inserts `key -> object`, or aliases the resident entry when the
    /// key is already taken. The flag is `true` for a fresh insert; when
    /// aliasing, `object` is dropped and the handle references the
    /// object already stored.
    pub fn insert(&self, key: K, object: V) -> (ObjectHandle<K, V>, bool) {
        let mut entries = self.core.entries.write();
        if let Some(resident) = entries.get(&key) {
            return (
                ObjectHandle::mint(self.host(), Arc::clone(resident)),
                false,
            );
        }
        let slot = Arc::new(Slot::new(key.clone(), object));
        entries.insert(key, Arc::clone(&slot));
        (ObjectHandle::mint(self.host(), slot), true)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let entries = self.core.entries.read();
        entries
            .get(key)
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.core.entries.read().contains_key(key)
    }

    /// Number of entries under `key`: zero or one.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        usize::from(self.contains(key))
    }

    pub fn use_count<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.core
            .entries
            .read()
            .get(key)
            .map(|slot| slot.use_count())
    }

    pub fn len(&self) -> usize {
        self.core.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for ManagedMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for ManagedMap<K, V> {
    fn drop(&mut self) {
        let remaining = self.core.entries.read().len();
        if remaining != 0 {
            error!("managed map dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

struct MultiMapInner<K, V> {
    entries: BTreeMap<K, Vec<Arc<Slot<K, V>>>>,
    len: usize,
}

struct MultiMapCore<K, V> {
    inner: RwLock<MultiMapInner<K, V>>,
}

impl<K, V> SlotTable<K, V> for MultiMapCore<K, V>
where
    K: Ord + Send + Sync,
    V: Send + Sync,
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
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(range) = inner.entries.get_mut(key) else {
            return Released::Retained;
        };
        let Some(position) = range.iter().position(|slot| EntryId::of(slot) == id) else {
            return Released::Retained;
        };
        if range[position].use_count() != 0 {
            return Released::Retained;
        }
        range.remove(position);
        inner.len -= 1;
        if range.is_empty() {
            inner.entries.remove(key);
        }
        Released::Erased
    }
}

/// Ordered table that keeps every entry inserted under a key.
///
/// Equal keys form a range in insertion order; each entry has its own
/// use-count and leaves the range when its last handle is released.
pub struct ManagedMultiMap<K, V> {
    core: Arc<MultiMapCore<K, V>>,
}

impl<K, V> ManagedMultiMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            core: Arc::new(MultiMapCore {
                inner: RwLock::new(MultiMapInner {
                    entries: BTreeMap::new(),
                    len: 0,
                }),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<K, V>> {
        Arc::clone(&self.core) as _
    }

    /// Stores `object` as a new entry under `key`, even when the key is
    /// already present.
    pub fn insert(&self, key: K, object: V) -> ObjectHandle<K, V> {
        let slot = Arc::new(Slot::new(key.clone(), object));
        let mut guard = self.core.inner.write();
        let inner = &mut *guard;
        inner.entries.entry(key).or_default().push(Arc::clone(&slot));
        inner.len += 1;
        ObjectHandle::mint(self.host(), slot)
    }

    /// Handle to the oldest entry under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let guard = self.core.inner.read();
        guard
            .entries
            .get(key)
            .and_then(|range| range.first())
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handle to the entry under `key` with the given identity.
    pub fn get_at<Q>(&self, key: &Q, id: EntryId) -> Option<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let guard = self.core.inner.read();
        guard
            .entries
            .get(key)
            .and_then(|range| range.iter().find(|slot| EntryId::of(slot) == id))
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handles to every entry under `key`, oldest first.
    pub fn get_all<Q>(&self, key: &Q) -> Vec<ObjectHandle<K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let guard = self.core.inner.read();
        match guard.entries.get(key) {
            Some(range) => range
                .iter()
                .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.core.inner.read().entries.contains_key(key)
    }

    /// Number of entries under `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.core
            .inner
            .read()
            .entries
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Use-count of the oldest entry under `key`.
    pub fn use_count<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let guard = self.core.inner.read();
        guard
            .entries
            .get(key)
            .and_then(|range| range.first())
            .map(|slot| slot.use_count())
    }

    /// Use-counts of every entry under `key`, oldest first.
    pub fn use_counts<Q>(&self, key: &Q) -> Vec<u32>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let guard = self.core.inner.read();
        match guard.entries.get(key) {
            Some(range) => range.iter().map(|slot| slot.use_count()).collect(),
            None => Vec::new(),
        }
    }

    /// Total number of entries across all keys.
    pub fn len(&self) -> usize {
        self.core.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for ManagedMultiMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for ManagedMultiMap<K, V> {
    fn drop(&mut self) {
        let remaining = self.core.inner.read().len;
        if remaining != 0 {
            error!("managed multi map dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}
