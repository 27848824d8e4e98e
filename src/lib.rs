//! Tables of reference-counted objects with RAII handles.
//!
//! Every table in this crate owns its objects and hands out handles
//! instead of references. A handle pins its entry: the entry leaves the
//! table only when the last handle is released, no matter which thread
//! releases it. Lookups revive entries — a `get` that lands before the
//! final release simply extends the entry's lifetime.
//!
//! ```
//! use managed_table::ManagedHashMap;
//!
//! let map = ManagedHashMap::new();
//! let handle = map.insert("unit".to_owned(), 42u32).unwrap();
//! assert_eq!(*handle.object(), 42);
//!
//! let again = map.get("unit").unwrap();
//! assert_eq!(again.use_count(), 2);
//!
//! drop(handle);
//! assert!(map.contains("unit"));
//! drop(again);
//! assert!(!map.contains("unit"));
//! ```
//!
//! # Design
//!
//! The crate is layered:
//!
//! - [`EntryId`] and the internal slot: one heap allocation per entry
//!   holding the payload, its key, and an atomic use-count. Slots never
//!   move, so handles survive any reorganization of their table.
//! - [`ObjectHandle`] / [`ValueHandle`]: reference-counting accessors.
//!   The count moves outside table locks; the release that observes the
//!   final decrement routes a removal request back to the owning table,
//!   which re-checks the count under its own write lock before erasing.
//! - Backends: an insertion-ordered list ([`ManagedList`]), ordered maps
//!   and sets on `BTreeMap`/`BTreeSet` behind one `RwLock`
//!   ([`ManagedMap`], [`ManagedMultiMap`], [`ManagedSet`],
//!   [`ManagedMultiSet`]), and sharded hash tables ([`ManagedHashMap`],
//!   [`ManagedHashMultiMap`], [`ManagedHashSet`],
//!   [`ManagedHashMultiSet`]) on the [`hash_table`] engine.
//! - [`ObjectRegistry`]: a dual-index manager addressing objects by
//!   unique ID or shared name, with composite handles that retire the
//!   name pair after the object's final release.
//!
//! The [`hash_table`] engine is usable on its own as a lock-striped
//! concurrent map/multimap/set/multiset without reference counting; see
//! [`ConcurrentMap`] and friends.
//!
//! # Duplicate policy
//!
//! Unique ordered tables alias: inserting a taken key (or equal value)
//! hands back another handle to the resident entry. Unique hash tables
//! refuse with [`InsertError::DuplicateKey`] and leave the resident
//! entry untouched. Multi tables always insert. The list never
//! deduplicates and releases entries purely by identity.
//!
//! # Constraints
//!
//! - Use-counts are `u32`; holding `u32::MAX` handles to one entry is
//!   outside the contract, as with `std::rc::Rc`.
//! - Dropping a table with live handles is diagnosed through the `log`
//!   facade. The handles stay usable — the storage core is shared — but
//!   the table is gone, so the entries can no longer be looked up.
//! - Closures passed to the [`hash_table`] engine run under stripe
//!   locks and must not call back into the same table.

mod error;
mod handle;
mod hash_map;
mod hash_set;
pub mod hash_table;
mod list;
mod registry;
mod slot;
mod tree_map;
mod tree_set;

mod hash_table_proptest;

pub use error::InsertError;
pub use handle::{ObjectHandle, ValueHandle};
pub use hash_map::{ManagedHashMap, ManagedHashMultiMap};
pub use hash_set::{ManagedHashMultiSet, ManagedHashSet};
pub use hash_table::{
    ConcurrentMap, ConcurrentMultiMap, ConcurrentMultiSet, ConcurrentSet, Element, HashTable,
    TableEntry,
};
pub use list::ManagedList;
pub use registry::{NamedObject, ObjectId, ObjectRegistry, RegistryConfig, RegistryHandle};
pub use slot::EntryId;
pub use tree_map::{ManagedMap, ManagedMultiMap};
pub use tree_set::{ManagedMultiSet, ManagedSet};
