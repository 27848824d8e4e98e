// Managed hash map integration suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Liveness: an entry is resident iff >= 1 handle to it is live; the
//   final release removes it, a clone or lookup keeps it.
// - Uniqueness: the unique map refuses duplicate keys without touching
//   the resident entry or its use-count.
// - Identity: multi-map entries under one key release independently,
//   each addressed by its own entry identity.
// - Stability: handles stay valid across engine growth and even after
//   the owning map itself is gone.
use managed_table::{InsertError, ManagedHashMap, ManagedHashMultiMap};
use std::thread;

// Test: basic liveness under insert/get/clone/drop.
// Assumes: len/contains reflect the presence of >= 1 live handle.
// Verifies: dropping the last handle removes the entry.
#[test]
fn insert_get_clone_drop_removes() {
    let map = ManagedHashMap::new();
    let r = map.insert("k1".to_owned(), 42u32).expect("insert ok");
    assert_eq!(map.len(), 1);
    assert!(map.contains("k1"));

    // get mints a new handle and increments the count
    let g = map.get("k1").expect("found");
    assert_eq!(*g.object(), 42);
    assert_eq!(g.use_count(), 2);

    // clone keeps the entry alive
    let g2 = g.clone();
    drop(g);
    assert!(map.contains("k1"));

    drop(g2);
    assert_eq!(map.len(), 1);

    // the original insert handle is the last one
    drop(r);
    assert_eq!(map.len(), 0);
    assert!(!map.contains("k1"));
}

// Test: unique keys policy.
// Assumes: a duplicate key is refused without side effects.
// Verifies: DuplicateKey error; resident entry and count untouched.
#[test]
fn duplicate_insert_rejected_without_side_effects() {
    let map = ManagedHashMap::new();
    let r = map.insert("dup".to_owned(), 1u32).unwrap();
    let e = map.insert("dup".to_owned(), 2u32);
    match e {
        Err(InsertError::DuplicateKey) => {}
        Ok(_) => panic!("expected duplicate insert to error"),
    }
    assert_eq!(r.use_count(), 1);
    assert_eq!(*map.get("dup").unwrap().object(), 1);
    assert_eq!(map.len(), 1);
    drop(r);

    // the key is free again after the final release
    let r2 = map.insert("dup".to_owned(), 2u32).unwrap();
    assert_eq!(*r2.object(), 2);
    drop(r2);
}

// Test: release re-checks the count under the map's lock.
// Assumes: dropping a non-final handle only decrements; the eviction
// happens on the drop that takes the count to zero.
// Verifies: presence after each drop matches the remaining handle count,
// and re-registering the key afterwards yields a distinct entry.
#[test]
fn release_recheck_targets_current_occupant() {
    let map = ManagedHashMap::new();
    let first = map.insert("k".to_owned(), 7u32).unwrap();
    let old_id = first.entry_id();

    let clones = [first.clone(), first.clone(), first.clone()];
    assert_eq!(first.use_count(), 4);
    for clone in clones {
        drop(clone);
        assert!(map.contains("k"), "non-final release must not evict");
    }
    assert_eq!(first.use_count(), 1);
    drop(first);
    assert!(!map.contains("k"));

    // A later occupant of the same key is a different entry.
    let second = map.insert("k".to_owned(), 8u32).unwrap();
    assert_ne!(second.entry_id(), old_id);
    assert_eq!(second.use_count(), 1);
    drop(second);
}

// Test: lookups revive entries.
// Scenario: the insert handle is dropped while a looked-up handle is
// still live; the entry must stay until that one goes too.
// Verifies: handle chains can extend past the original insert handle.
#[test]
fn lookup_extends_entry_lifetime() {
    let map = ManagedHashMap::new();
    let original = map.insert(1u64, "payload".to_owned()).unwrap();
    let revived = map.get(&1).unwrap();
    drop(original);
    assert!(map.contains(&1));
    assert_eq!(revived.object(), "payload");
    assert_eq!(revived.use_count(), 1);
    drop(revived);
    assert!(map.is_empty());
}

// Test: two entries under one key report their own counts.
// Scenario: "alpha" is registered twice in the multi map; one entry
// gains extra handles, the other keeps one.
// Verifies: use_count_at is entry-specific, never a key aggregate, and
// each entry releases on its own.
#[test]
fn two_entries_one_key_report_their_own_counts() {
    let map = ManagedHashMultiMap::new();
    let first = map.insert("alpha".to_owned(), 1u32);
    let second = map.insert("alpha".to_owned(), 2u32);
    assert_eq!(map.count("alpha"), 2);

    // Pin the newest entry twice more.
    let a = map.get("alpha").unwrap();
    let b = a.clone();
    assert_eq!(a.entry_id(), second.entry_id());
    assert_eq!(map.use_count_at("alpha", second.entry_id()), Some(3));
    assert_eq!(map.use_count_at("alpha", first.entry_id()), Some(1));
    assert_eq!(map.use_counts("alpha"), vec![3, 1]);

    // Releasing the older entry leaves the pinned one alone.
    drop(first);
    assert_eq!(map.count("alpha"), 1);
    assert_eq!(map.use_counts("alpha"), vec![3]);

    drop((a, b, second));
    assert!(!map.contains("alpha"));
}

// Test: multi-map identity addressing survives same-key churn.
// Assumes: a release only evicts the entry whose identity it carries.
// Verifies: dropping the last handle of one duplicate never takes a
// same-key sibling with it.
#[test]
fn release_of_one_duplicate_spares_the_sibling() {
    let map = ManagedHashMultiMap::new();
    let doomed = map.insert("k".to_owned(), 1u32);
    let kept = map.insert("k".to_owned(), 2u32);
    let kept_id = kept.entry_id();

    drop(doomed);
    assert_eq!(map.count("k"), 1);
    let survivor = map.get("k").unwrap();
    assert_eq!(survivor.entry_id(), kept_id);
    assert_eq!(*survivor.object(), 2);
    drop((kept, survivor));
    assert!(map.is_empty());
}

// Test: engine growth under live handles.
// Assumes: the wrapper grows the engine before the fill line; entries
// never move between heap slots during a rehash.
// Verifies: hundreds of handles stay valid across several growths.
#[test]
fn growth_keeps_handles_valid() {
    let map = ManagedHashMap::new();
    let before = map.bucket_count();
    let handles: Vec<_> = (0..2000u64)
        .map(|key| map.insert(key, key * 31).unwrap())
        .collect();
    assert!(map.bucket_count() > before);
    assert_eq!(map.len(), 2000);

    for handle in &handles {
        assert_eq!(*handle.object(), handle.key() * 31);
        assert_eq!(map.use_count(handle.key()), Some(1));
    }
    drop(handles);
    assert!(map.is_empty());
}

// Test: concurrent release of clones evicts exactly once.
// Scenario: rounds of 8 threads dropping clones of one entry at once.
// Verifies: the entry disappears after each round and len never skews,
// which would show if two releasers both erased.
#[test]
fn concurrent_clone_drops_evict_exactly_once() {
    let map = ManagedHashMap::new();
    for round in 0..50u64 {
        let anchor = map.insert(round, round).unwrap();
        let clones: Vec<_> = (0..8).map(|_| anchor.clone()).collect();
        drop(anchor);
        thread::scope(|scope| {
            for clone in clones {
                scope.spawn(move || drop(clone));
            }
        });
        assert!(!map.contains(&round), "round {round} left a zombie entry");
        assert!(map.is_empty(), "round {round} skewed len to {}", map.len());
    }
}

// Test: revival racing the final release.
// Scenario: reader threads loop get-then-drop on a key while the anchor
// handle drops midway; a get may land in the window between the final
// decrement and the under-lock removal.
// Verifies: every lookup yields either a working handle or None, and
// once all handles are gone the entry is gone.
#[test]
fn revival_race_with_final_release_stays_consistent() {
    for round in 0..20u64 {
        let map = ManagedHashMap::new();
        let anchor = map.insert("hot".to_owned(), round).unwrap();
        thread::scope(|scope| {
            for _ in 0..4 {
                let map = &map;
                scope.spawn(move || {
                    for _ in 0..200 {
                        if let Some(handle) = map.get("hot") {
                            assert_eq!(*handle.object(), round);
                        }
                    }
                });
            }
            scope.spawn(move || drop(anchor));
        });
        assert!(!map.contains("hot"));
        assert!(map.is_empty());
    }
}

// Test: handles outlive their map.
// Assumes: the storage core is shared between map and handles, so a
// handle stays readable after the map is dropped (the drop is logged).
// Verifies: no panic; the handle still reads its entry.
#[test]
fn handle_survives_map_drop() {
    let handle = {
        let map = ManagedHashMap::new();
        map.insert("k".to_owned(), 5u32).unwrap()
    }; // map dropped here with one live entry

    assert_eq!(*handle.object(), 5);
    let clone = handle.clone();
    assert_eq!(clone.use_count(), 2);
    drop(handle);
    drop(clone);
}
