//! Ordered value-keyed tables with reference-counted entries.
//!
//! The stored value is its own key. A slot wrapper that orders by the
//! payload lets the tree be searched with plain `&T` borrows while the
//! actual storage stays shared with the handles.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::error;
use parking_lot::RwLock;

use crate::handle::{ObjectHandle, Released, SlotIdentity, SlotTable, ValueHandle};
use crate::slot::{EntryId, Slot};

/// Tree node keyed by the slot's payload.
struct OrdSlot<T>(Arc<Slot<(), T>>);

impl<T: Eq> PartialEq for OrdSlot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.object() == other.0.object()
    }
}

impl<T: Eq> Eq for OrdSlot<T> {}

impl<T: Ord> PartialOrd for OrdSlot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for OrdSlot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.object().cmp(other.0.object())
    }
}

impl<T> Borrow<T> for OrdSlot<T> {
    fn borrow(&self) -> &T {
        self.0.object()
    }
}

struct SetCore<T> {
    entries: RwLock<BTreeSet<OrdSlot<T>>>,
}

impl<T> SlotTable<(), T> for SetCore<T>
where
    T: Ord + Send + Sync,
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
        let mut entries = self.entries.write();
        let expired = entries
            .get(value)
            .is_some_and(|node| node.0.use_count() == 0);
        if !expired {
            return Released::Retained;
        }
        entries.remove(value);
        Released::Erased
    }
}

/// Ordered set of reference-counted values.
///
/// Inserting a value that is already present aliases the resident entry
/// instead of storing a second copy. An entry leaves the set when its
/// last handle is released.
pub struct ManagedSet<T> {
    core: Arc<SetCore<T>>,
}

impl<T> ManagedSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            core: Arc::new(SetCore {
                entries: RwLock::new(BTreeSet::new()),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<(), T>> {
        Arc::clone(&self.core) as _
    }

    /// Inserts `object`, or aliases the resident equal entry. The flag is
    /// `true` for a fresh insert; when aliasing, `object` is dropped.
    pub fn insert(&self, object: T) -> (ValueHandle<T>, bool) {
        let mut entries = self.core.entries.write();
        if let Some(resident) = entries.get(&object) {
            return (
                ObjectHandle::mint(self.host(), Arc::clone(&resident.0)),
                false,
            );
        }
        let slot = Arc::new(Slot::new((), object));
        entries.insert(OrdSlot(Arc::clone(&slot)));
        (ObjectHandle::mint(self.host(), slot), true)
    }

    pub fn get(&self, object: &T) -> Option<ValueHandle<T>> {
        let entries = self.core.entries.read();
        entries
            .get(object)
            .map(|node| ObjectHandle::mint(self.host(), Arc::clone(&node.0)))
    }

    pub fn contains(&self, object: &T) -> bool {
        self.core.entries.read().get(object).is_some()
    }

    /// Number of entries equal to `object`: zero or one.
    pub fn count(&self, object: &T) -> usize {
        usize::from(self.contains(object))
    }

    pub fn use_count(&self, object: &T) -> Option<u32> {
        self.core
            .entries
            .read()
            .get(object)
            .map(|node| node.0.use_count())
    }

    pub fn len(&self) -> usize {
        self.core.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ManagedSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ManagedSet<T> {
    fn drop(&mut self) {
        let remaining = self.core.entries.read().len();
        if remaining != 0 {
            error!("managed set dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

struct MultiSetInner<T> {
    /// Equal values share one tree entry. Invariant: the key's slot is
    /// always `range[0]`; removals at the front re-key the entry on the
    /// surviving head.
    entries: BTreeMap<OrdSlot<T>, Vec<Arc<Slot<(), T>>>>,
    len: usize,
}

struct MultiSetCore<T> {
    inner: RwLock<MultiSetInner<T>>,
}

impl<T> SlotTable<(), T> for MultiSetCore<T>
where
    T: Ord + Send + Sync,
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
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(range) = inner.entries.get_mut(value) else {
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
        let empty = range.is_empty();
        if empty {
            inner.entries.remove(value);
        } else if position == 0 {
            // The range's key anchor was evicted; re-key on the new head.
            if let Some(survivors) = inner.entries.remove(value) {
                if let Some(head) = survivors.first() {
                    let anchor = OrdSlot(Arc::clone(head));
                    inner.entries.insert(anchor, survivors);
                }
            }
        }
        Released::Erased
    }
}

/// Ordered collection that keeps equal values as separate entries.
///
/// Each inserted value gets its own entry and use-count; equal values
/// form a range in insertion order and release independently.
pub struct ManagedMultiSet<T> {
    core: Arc<MultiSetCore<T>>,
}

impl<T> ManagedMultiSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            core: Arc::new(MultiSetCore {
                inner: RwLock::new(MultiSetInner {
                    entries: BTreeMap::new(),
                    len: 0,
                }),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<(), T>> {
        Arc::clone(&self.core) as _
    }

    /// Stores `object` as a new entry, next to any equal ones.
    pub fn insert(&self, object: T) -> ValueHandle<T> {
        let mut guard = self.core.inner.write();
        let inner = &mut *guard;
        if let Some(range) = inner.entries.get_mut(&object) {
            let slot = Arc::new(Slot::new((), object));
            range.push(Arc::clone(&slot));
            inner.len += 1;
            return ObjectHandle::mint(self.host(), slot);
        }
        let slot = Arc::new(Slot::new((), object));
        inner
            .entries
            .insert(OrdSlot(Arc::clone(&slot)), vec![Arc::clone(&slot)]);
        inner.len += 1;
        ObjectHandle::mint(self.host(), slot)
    }

    /// Handle to the oldest entry equal to `object`.
    pub fn get(&self, object: &T) -> Option<ValueHandle<T>> {
        let guard = self.core.inner.read();
        guard
            .entries
            .get(object)
            .and_then(|range| range.first())
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handle to the entry equal to `object` with the given identity.
    pub fn get_at(&self, object: &T, id: EntryId) -> Option<ValueHandle<T>> {
        let guard = self.core.inner.read();
        guard
            .entries
            .get(object)
            .and_then(|range| range.iter().find(|slot| EntryId::of(slot) == id))
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handles to every entry equal to `object`, oldest first.
    pub fn get_all(&self, object: &T) -> Vec<ValueHandle<T>> {
        let guard = self.core.inner.read();
        match guard.entries.get(object) {
            Some(range) => range
                .iter()
                .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, object: &T) -> bool {
        self.core.inner.read().entries.contains_key(object)
    }

    /// Number of entries equal to `object`.
    pub fn count(&self, object: &T) -> usize {
        self.core.inner.read().entries.get(object).map_or(0, Vec::len)
    }

    /// Use-counts of every entry equal to `object`, oldest first.
    pub fn use_counts(&self, object: &T) -> Vec<u32> {
        let guard = self.core.inner.read();
        match guard.entries.get(object) {
            Some(range) => range.iter().map(|slot| slot.use_count()).collect(),
            None => Vec::new(),
        }
    }

    /// Total number of entries across all values.
    pub fn len(&self) -> usize {
        self.core.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ManagedMultiSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ManagedMultiSet<T> {
    fn drop(&mut self) {
        let remaining = self.core.inner.read().len;
        if remaining != 0 {
            error!("managed multi set dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}
