//! Storage slot: one payload plus the atomic counter tracking its handles.
//!
//! A slot is allocated once, inside an `Arc`, when its entry is inserted,
//! and stays at that address for as long as either the table or any handle
//! still references it. Tables are free to reorganize their own storage
//! (rehash, re-balance, shift) because handles never point into container
//! memory; they point at the slot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A stored payload and its use-counter.
///
/// Value-keyed containers (lists, sets) use `K = ()`. Key-keyed containers
/// keep the key inside the slot so that a releasing handle can name the
/// entry it is releasing without holding any table lock.
pub(crate) struct Slot<K, T> {
    key: K,
    object: T,
    use_count: AtomicU32,
}

impl<K, T> Slot<K, T> {
    /// A fresh slot starts at use-count zero; the first handle minted for
    /// it performs the 0 -> 1 transition under the inserting table's lock.
    pub(crate) fn new(key: K, object: T) -> Self {
        Self {
            key,
            object,
            use_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn object(&self) -> &T {
        &self.object
    }

    /// Current reference count. Exact only while the caller prevents
    /// concurrent clone/release traffic on this slot, e.g. by holding the
    /// lock that makes the slot reachable.
    pub(crate) fn use_count(&self) -> u32 {
        self.use_count.load(Ordering::Relaxed)
    }

    /// Adds one reference unit and returns the previous count.
    ///
    /// Counter overflow is outside the contract, as with `Rc`: callers
    /// must not hold `u32::MAX` handles to one entry.
    pub(crate) fn increment(&self) -> u32 {
        self.use_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Removes one reference unit and returns the previous count. The
    /// caller that observes `1` owns the eviction request for this slot.
    pub(crate) fn decrement(&self) -> u32 {
        self.use_count.fetch_sub(1, Ordering::AcqRel)
    }
}

/// Address-derived identity of a live entry.
///
/// Multi-key tables use it to single out one slot within an equal range,
/// both in lookups and when a releasing handle asks for its own entry to
/// be removed. The identity is stable while the entry is alive; once every
/// reference to the entry is gone the address may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

impl EntryId {
    pub(crate) fn of<K, T>(slot: &Arc<Slot<K, T>>) -> Self {
        EntryId(Arc::as_ptr(slot) as usize)
    }
}
