//! Dual-index registry of named objects.
//!
//! Objects carry a numeric identity and a name; identities are unique,
//! names are not. The registry stores each object exactly once, in an
//! ID-keyed [`ManagedHashMap`], and keeps a plain name-to-ID index next
//! to it. Lookups by name fan out through the index and resolve each ID
//! against the object table.
//!
//! Handles are composite: the final release removes the object from the
//! ID table first and then drops the matching name pair. Registration
//! indexes the name before the object. Between the two, an object that
//! is reachable by ID always has its name pair present; the index may
//! briefly carry an ID whose object is already gone (or not yet there),
//! which by-name lookups skip.

use std::fmt;
use std::sync::Arc;

use crate::error::InsertError;
use crate::handle::{release_slot, ObjectHandle, Released, SlotTable};
use crate::hash_map::ManagedHashMap;
use crate::hash_table::ConcurrentMultiMap;
use crate::slot::Slot;

/// Numeric identity of a registered object. Assigned by the payload,
/// unique per live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Payload contract for [`ObjectRegistry`].
pub trait NamedObject {
    /// The object's name. Any number of objects may share one.
    fn object_name(&self) -> &str;

    /// The object's identity. Must be unique among live objects;
    /// registering a taken ID fails.
    fn object_id(&self) -> ObjectId;
}

/// Initial sizing of the registry's two tables.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Entries the ID-to-object table is pre-sized for.
    pub object_capacity: usize,
    /// Pairs the name index is pre-sized for.
    pub name_capacity: usize,
}

/// Registry of reference-counted objects addressable by ID or by name.
pub struct ObjectRegistry<T: NamedObject> {
    objects: ManagedHashMap<ObjectId, T>,
    names: Arc<ConcurrentMultiMap<String, ObjectId>>,
}

impl<T> ObjectRegistry<T>
where
    T: NamedObject + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            objects: ManagedHashMap::with_capacity(config.object_capacity),
            names: Arc::new(ConcurrentMultiMap::with_capacity(config.name_capacity)),
        }
    }

    /// Registers `object` under its own ID and name and returns the
    /// first handle to it.
    ///
    /// The name pair is indexed before the object becomes reachable and
    /// rolled back if the ID turns out to be taken; in that case `object`
    /// is dropped and the resident object stays untouched.
    pub fn add_object(&self, object: T) -> Result<RegistryHandle<T>, InsertError> {
        let id = object.object_id();
        let name = object.object_name().to_owned();
        self.names.insert(name.clone(), id);
        match self.objects.insert(id, object) {
            Ok(handle) => Ok(RegistryHandle::adopt(handle, Arc::clone(&self.names))),
            Err(err) => {
                self.names.erase_if(&name, |entry| entry.1 == id);
                Err(err)
            }
        }
    }

    /// Handle to the object with `id`.
    pub fn get_object(&self, id: ObjectId) -> Option<RegistryHandle<T>> {
        self.objects
            .get(&id)
            .map(|handle| RegistryHandle::adopt(handle, Arc::clone(&self.names)))
    }

    /// Handles to every object registered under `name`.
    ///
    /// IDs whose object is mid-release (or mid-registration) drop out of
    /// the result instead of failing the call.
    pub fn get_objects_by_name(&self, name: &str) -> Vec<RegistryHandle<T>> {
        self.ids_by_name(name)
            .into_iter()
            .filter_map(|id| self.get_object(id))
            .collect()
    }

    /// IDs currently indexed under `name`, newest registration first.
    pub fn ids_by_name(&self, name: &str) -> Vec<ObjectId> {
        self.names.get_all(name)
    }

    /// Whether an object with `id` is registered.
    pub fn have(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }

    /// Number of registered objects sharing `id`'s name, or zero when
    /// `id` is not registered. A count over the name, addressed through
    /// one of its IDs.
    pub fn count(&self, id: ObjectId) -> usize {
        match self.get_object(id) {
            Some(handle) => self.names.count(handle.object_name()),
            None => 0,
        }
    }

    /// Use-count of the object with `id`.
    pub fn use_count(&self, id: ObjectId) -> Option<u32> {
        self.objects.use_count(&id)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Pre-sizes both tables for `objects` registrations.
    pub fn reserve(&self, objects: usize) {
        self.objects.reserve(objects);
        self.names.reserve(objects);
    }
}

impl<T> Default for ObjectRegistry<T>
where
    T: NamedObject + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered object.
///
/// Besides pinning the object like an [`ObjectHandle`], it carries the
/// name index so the final release can drop the object's name pair right
/// after the object leaves the ID table.
pub struct RegistryHandle<T: NamedObject> {
    host: Arc<dyn SlotTable<ObjectId, T>>,
    slot: Arc<Slot<ObjectId, T>>,
    names: Arc<ConcurrentMultiMap<String, ObjectId>>,
}

impl<T: NamedObject> RegistryHandle<T> {
    /// Takes over the reference unit of a plain object-table handle.
    fn adopt(
        handle: ObjectHandle<ObjectId, T>,
        names: Arc<ConcurrentMultiMap<String, ObjectId>>,
    ) -> Self {
        let (host, slot) = handle.into_parts();
        Self { host, slot, names }
    }

    pub fn object(&self) -> &T {
        self.slot.object()
    }

    pub fn object_id(&self) -> ObjectId {
        *self.slot.key()
    }

    pub fn object_name(&self) -> &str {
        self.slot.object().object_name()
    }

    /// Current use-count of the object. A snapshot.
    pub fn use_count(&self) -> u32 {
        self.slot.use_count()
    }

    /// Returns this reference unit now. Equivalent to dropping.
    pub fn release(self) {}
}

impl<T: NamedObject> Clone for RegistryHandle<T> {
    fn clone(&self) -> Self {
        self.slot.increment();
        Self {
            host: Arc::clone(&self.host),
            slot: Arc::clone(&self.slot),
            names: Arc::clone(&self.names),
        }
    }
}

impl<T: NamedObject> Drop for RegistryHandle<T> {
    fn drop(&mut self) {
        if release_slot(&self.host, &self.slot) == Released::Erased {
            // The object left the ID table in this call; retire its name
            // pair. The slot Arc is still held here, so the name stays
            // readable even though the object is unreachable.
            let id = *self.slot.key();
            self.names
                .erase_if(self.slot.object().object_name(), |entry| entry.1 == id);
        }
    }
}

impl<T: NamedObject + fmt::Debug> fmt::Debug for RegistryHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("id", &self.object_id())
            .field("object", self.object())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Asset {
        id: ObjectId,
        name: String,
    }

    impl Asset {
        fn new(id: u64, name: &str) -> Self {
            Self {
                id: ObjectId(id),
                name: name.to_owned(),
            }
        }
    }

    impl NamedObject for Asset {
        fn object_name(&self) -> &str {
            &self.name
        }

        fn object_id(&self) -> ObjectId {
            self.id
        }
    }

    /// Invariant: a registered object is reachable by ID and by name,
    /// and both routes pin the same entry.
    #[test]
    fn reachable_by_id_and_name() {
        let registry = ObjectRegistry::new();
        let handle = registry.add_object(Asset::new(1, "mesh")).unwrap();
        assert!(registry.have(ObjectId(1)));
        assert_eq!(registry.len(), 1);

        let by_id = registry.get_object(ObjectId(1)).unwrap();
        assert_eq!(by_id.object_name(), "mesh");
        let by_name = registry.get_objects_by_name("mesh");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].object_id(), ObjectId(1));
        assert_eq!(handle.use_count(), 3);

        drop((handle, by_id, by_name));
        assert!(!registry.have(ObjectId(1)));
        assert!(registry.ids_by_name("mesh").is_empty());
    }

    /// Invariant: a taken ID refuses the registration and rolls the name
    /// pair back out of the index.
    #[test]
    fn duplicate_id_rolls_back_the_name_pair() {
        let registry = ObjectRegistry::new();
        let first = registry.add_object(Asset::new(7, "tex")).unwrap();
        let refused = registry.add_object(Asset::new(7, "tex2"));
        assert_eq!(refused.unwrap_err(), InsertError::DuplicateKey);

        assert_eq!(registry.len(), 1);
        assert!(registry.ids_by_name("tex2").is_empty());
        assert_eq!(registry.ids_by_name("tex"), vec![ObjectId(7)]);
        assert_eq!(first.object_name(), "tex");
        drop(first);
        assert!(registry.is_empty());
    }

    /// Invariant: `count` is a name-wide count addressed through an ID.
    #[test]
    fn count_spans_the_shared_name() {
        let registry = ObjectRegistry::new();
        let a = registry.add_object(Asset::new(1, "shared")).unwrap();
        let b = registry.add_object(Asset::new(2, "shared")).unwrap();
        let c = registry.add_object(Asset::new(3, "solo")).unwrap();

        assert_eq!(registry.count(ObjectId(1)), 2);
        assert_eq!(registry.count(ObjectId(2)), 2);
        assert_eq!(registry.count(ObjectId(3)), 1);
        assert_eq!(registry.count(ObjectId(9)), 0);

        drop(b);
        assert_eq!(registry.count(ObjectId(1)), 1);
        drop((a, c));
        assert!(registry.is_empty());
    }

    /// Invariant: the final release clears both indexes; a clone keeps
    /// the object registered.
    #[test]
    fn final_release_clears_both_indexes() {
        let registry = ObjectRegistry::new();
        let handle = registry.add_object(Asset::new(4, "sound")).unwrap();
        let kept = handle.clone();
        assert_eq!(kept.use_count(), 2);

        drop(handle);
        assert!(registry.have(ObjectId(4)));
        assert_eq!(registry.ids_by_name("sound"), vec![ObjectId(4)]);

        drop(kept);
        assert!(!registry.have(ObjectId(4)));
        assert!(registry.ids_by_name("sound").is_empty());
        assert_eq!(registry.use_count(ObjectId(4)), None);
    }
}
