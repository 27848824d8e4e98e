//! Insertion-ordered table of reference-counted values.
//!
//! The list is the simplest managed shape: values are not deduplicated,
//! lookups scan, and a released entry is matched purely by its identity,
//! never by value equality. Equal payloads therefore coexist and release
//! independently.

use std::sync::Arc;

use log::error;
use parking_lot::RwLock;

use crate::handle::{ObjectHandle, Released, SlotIdentity, SlotTable, ValueHandle};
use crate::slot::{EntryId, Slot};

struct ListCore<T> {
    entries: RwLock<Vec<Arc<Slot<(), T>>>>,
}

impl<T: Send + Sync> SlotTable<(), T> for ListCore<T> {
    fn is_multi(&self) -> bool {
        true
    }

    fn is_keyed(&self) -> bool {
        false
    }

    fn remove_expired(&self, identity: SlotIdentity<'_, (), T>) -> Released {
        let SlotIdentity::ValueAt(_, id) = identity else {
            return Released::Retained;
        };
        let mut entries = self.entries.write();
        let Some(position) = entries.iter().position(|slot| EntryId::of(slot) == id) else {
            return Released::Retained;
        };
        if entries[position].use_count() != 0 {
            // Revived by a lookup between the decrement and this lock.
            return Released::Retained;
        }
        entries.remove(position);
        Released::Erased
    }
}

/// Insertion-ordered collection of reference-counted values.
///
/// Every insert stores a new entry, even for equal values. Lookups scan
/// newest-first, so `get` on a duplicated value returns a handle to the
/// most recently inserted entry. An entry leaves the list when its last
/// handle is released.
pub struct ManagedList<T> {
    core: Arc<ListCore<T>>,
}

impl<T: Send + Sync + 'static> ManagedList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            core: Arc::new(ListCore {
                entries: RwLock::new(Vec::with_capacity(capacity)),
            }),
        }
    }

    fn host(&self) -> Arc<dyn SlotTable<(), T>> {
        Arc::clone(&self.core) as _
    }

    /// Stores `object` as a new entry and returns its first handle.
    pub fn insert(&self, object: T) -> ValueHandle<T> {
        let slot = Arc::new(Slot::new((), object));
        let mut entries = self.core.entries.write();
        entries.push(Arc::clone(&slot));
        // Minted before the lock drops, so the new entry can never be
        // seen at count zero by a racing releaser.
        ObjectHandle::mint(self.host(), slot)
    }

    /// Handle to the newest entry equal to `object`.
    pub fn get(&self, object: &T) -> Option<ValueHandle<T>>
    where
        T: Eq,
    {
        let entries = self.core.entries.read();
        entries
            .iter()
            .rev()
            .find(|slot| slot.object() == object)
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handle to the entry equal to `object` with the given identity.
    pub fn get_at(&self, object: &T, id: EntryId) -> Option<ValueHandle<T>>
    where
        T: Eq,
    {
        let entries = self.core.entries.read();
        entries
            .iter()
            .rev()
            .find(|slot| EntryId::of(slot) == id && slot.object() == object)
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
    }

    /// Handles to every entry equal to `object`, newest first.
    pub fn get_all(&self, object: &T) -> Vec<ValueHandle<T>>
    where
        T: Eq,
    {
        let entries = self.core.entries.read();
        entries
            .iter()
            .rev()
            .filter(|slot| slot.object() == object)
            .map(|slot| ObjectHandle::mint(self.host(), Arc::clone(slot)))
            .collect()
    }

    pub fn contains(&self, object: &T) -> bool
    where
        T: Eq,
    {
        self.core
            .entries
            .read()
            .iter()
            .any(|slot| slot.object() == object)
    }

    /// Number of entries equal to `object`.
    pub fn count(&self, object: &T) -> usize
    where
        T: Eq,
    {
        self.core
            .entries
            .read()
            .iter()
            .filter(|slot| slot.object() == object)
            .count()
    }

    /// Use-count of the newest entry equal to `object`.
    pub fn use_count(&self, object: &T) -> Option<u32>
    where
        T: Eq,
    {
        let entries = self.core.entries.read();
        entries
            .iter()
            .rev()
            .find(|slot| slot.object() == object)
            .map(|slot| slot.use_count())
    }

    /// Use-counts of every entry equal to `object`, newest first.
    pub fn use_counts(&self, object: &T) -> Vec<u32>
    where
        T: Eq,
    {
        let entries = self.core.entries.read();
        entries
            .iter()
            .rev()
            .filter(|slot| slot.object() == object)
            .map(|slot| slot.use_count())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.core.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-allocates room for `additional` more entries.
    pub fn reserve(&self, additional: usize) {
        self.core.entries.write().reserve(additional);
    }
}

impl<T: Send + Sync + 'static> Default for ManagedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ManagedList<T> {
    fn drop(&mut self) {
        let remaining = self.core.entries.read().len();
        if remaining != 0 {
            error!("managed list dropped with {remaining} live entries; outstanding handles keep them reachable until released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: equal values stack as separate entries; the newest one
    /// answers single-entry lookups.
    #[test]
    fn equal_values_are_separate_entries() {
        let list = ManagedList::new();
        let first = list.insert("dup".to_owned());
        let second = list.insert("dup".to_owned());
        assert_eq!(list.len(), 2);
        assert_ne!(first.entry_id(), second.entry_id());

        let found = list.get(&"dup".to_owned()).unwrap();
        assert_eq!(found.entry_id(), second.entry_id());
        assert_eq!(list.count(&"dup".to_owned()), 2);
        drop(found);

        // Releasing one duplicate leaves the other resident.
        drop(second);
        assert_eq!(list.len(), 1);
        assert!(list.contains(&"dup".to_owned()));
        drop(first);
        assert!(list.is_empty());
    }

    /// Invariant: `get` revives an entry, so the handle chain can extend
    /// past the original insert handle.
    #[test]
    fn lookup_extends_the_lifetime() {
        let list = ManagedList::new();
        let original = list.insert(42u32);
        let looked_up = list.get(&42).unwrap();
        assert_eq!(looked_up.use_count(), 2);
        drop(original);
        assert_eq!(list.len(), 1);
        drop(looked_up);
        assert!(list.is_empty());
    }

    /// Invariant: identity-addressed lookup picks the exact entry out of
    /// an equal range.
    #[test]
    fn identity_lookup_selects_one_duplicate() {
        let list = ManagedList::new();
        let first = list.insert(7u8);
        let second = list.insert(7u8);
        let picked = list.get_at(&7, first.entry_id()).unwrap();
        assert_eq!(picked.entry_id(), first.entry_id());
        assert_eq!(list.use_counts(&7), vec![1, 2]);
        assert!(list.get_at(&8, first.entry_id()).is_none());
        drop((first, second, picked));
        assert!(list.is_empty());
    }
}
