//! Handles and the removal contract between handles and their tables.
//!
//! Every lookup or insert mints an [`ObjectHandle`]: a reference-counting
//! accessor to one stored entry. Minting increments the entry's use-count
//! while the minting table still holds the lock that makes the entry
//! reachable, so a concurrent releaser can never observe a transient zero
//! on an entry that is about to gain its first handle.
//!
//! Releasing runs in two steps. The decrement happens outside any lock;
//! the handle that observes the 1 -> 0 transition then asks the owning
//! table to remove the entry, and the table re-checks the count under its
//! own write lock before unlinking. A `get` may have revived the entry in
//! the window between the two steps, in which case the removal request is
//! a no-op.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::Arc;

use crate::slot::{EntryId, Slot};

/// How a releasing handle names the entry it decremented.
///
/// Unique-key tables are addressed by key or value alone. Multi-key tables
/// add the [`EntryId`] so the request singles out one slot of an equal
/// range.
pub(crate) enum SlotIdentity<'a, K, T> {
    /// Unique value-keyed tables.
    Value(&'a T),
    /// Multi value-keyed tables.
    ValueAt(&'a T, EntryId),
    /// Unique key-keyed tables.
    Key(&'a K),
    /// Multi key-keyed tables.
    KeyAt(&'a K, EntryId),
}

/// Outcome of a removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// This call unlinked the slot from the container.
    Erased,
    /// The entry stays resident: the under-lock re-check saw a live
    /// count, or the entry was already gone because a racing release got
    /// there first. Both are benign.
    Retained,
}

/// Removal contract implemented by every table that mints handles.
///
/// The capability queries are fixed per concrete table type; a releasing
/// handle consults them to build the matching [`SlotIdentity`].
pub(crate) trait SlotTable<K, T>: Send + Sync {
    /// Whether one key may map to several entries.
    fn is_multi(&self) -> bool;

    /// Whether key and stored value are distinct (map-like). Value-keyed
    /// tables report `false` and are addressed by the payload itself.
    fn is_keyed(&self) -> bool;

    /// Unlinks the identified entry if its use-count is still zero.
    ///
    /// Implementations must take their own write lock, locate the entry,
    /// and re-check the count before erasing. A missing entry is not an
    /// error.
    fn remove_expired(&self, identity: SlotIdentity<'_, K, T>) -> Released;
}

/// Reference-counting accessor to one stored entry.
///
/// A handle keeps its entry resident: the entry leaves its table only
/// after the last handle is dropped (or [`released`](Self::release)). The
/// handle stays valid across any reorganization of the owning table,
/// including rehashes.
///
/// Cloning mints another reference unit for the same entry.
pub struct ObjectHandle<K, T> {
    table: Arc<dyn SlotTable<K, T>>,
    slot: Arc<Slot<K, T>>,
}

/// Handle to an entry of a value-keyed table, where the stored value acts
/// as its own key.
pub type ValueHandle<T> = ObjectHandle<(), T>;

impl<K, T> ObjectHandle<K, T> {
    /// Mints the next reference unit for `slot`.
    ///
    /// Callers must hold the lock under which the slot is currently
    /// reachable, so the increment cannot race a releaser's under-lock
    /// re-check.
    pub(crate) fn mint(table: Arc<dyn SlotTable<K, T>>, slot: Arc<Slot<K, T>>) -> Self {
        slot.increment();
        Self { table, slot }
    }

    /// The stored object.
    pub fn object(&self) -> &T {
        self.slot.object()
    }

    /// The key this entry is stored under. For value-keyed tables this is
    /// `&()`; use [`object`](Self::object) there.
    pub fn key(&self) -> &K {
        self.slot.key()
    }

    /// Current use-count of the entry. Other handles can be minted and
    /// released concurrently, so treat the value as a snapshot.
    pub fn use_count(&self) -> u32 {
        self.slot.use_count()
    }

    /// Identity of the referenced entry, stable for the entry's lifetime.
    pub fn entry_id(&self) -> EntryId {
        EntryId::of(&self.slot)
    }

    /// Returns this reference unit now. Equivalent to dropping the handle.
    pub fn release(self) {}

    /// Dismantles the handle without touching the counter; the caller
    /// takes over its reference unit.
    pub(crate) fn into_parts(self) -> (Arc<dyn SlotTable<K, T>>, Arc<Slot<K, T>>) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped and each field is read exactly
        // once, so ownership of both `Arc`s moves to the caller.
        unsafe { (ptr::read(&this.table), ptr::read(&this.slot)) }
    }
}

impl<K, T> Clone for ObjectHandle<K, T> {
    fn clone(&self) -> Self {
        // A live handle pins the count above zero, so no releaser can be
        // erasing this entry while we add a unit.
        self.slot.increment();
        Self {
            table: Arc::clone(&self.table),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<K, T> Drop for ObjectHandle<K, T> {
    fn drop(&mut self) {
        release_slot(&self.table, &self.slot);
    }
}

impl<K: fmt::Debug, T: fmt::Debug> fmt::Debug for ObjectHandle<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("key", self.key())
            .field("object", self.object())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// Returns one reference unit and, when this call observed the 1 -> 0
/// transition, routes the eviction request to the owning table. Shared by
/// plain and composite handles.
pub(crate) fn release_slot<K, T>(
    table: &Arc<dyn SlotTable<K, T>>,
    slot: &Arc<Slot<K, T>>,
) -> Released {
    if slot.decrement() != 1 {
        return Released::Retained;
    }
    let identity = match (table.is_keyed(), table.is_multi()) {
        (false, false) => SlotIdentity::Value(slot.object()),
        (false, true) => SlotIdentity::ValueAt(slot.object(), EntryId::of(slot)),
        (true, false) => SlotIdentity::Key(slot.key()),
        (true, true) => SlotIdentity::KeyAt(slot.key(), EntryId::of(slot)),
    };
    table.remove_expired(identity)
}
