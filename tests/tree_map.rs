// Ordered managed map integration suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Aliasing: the unique map answers a duplicate insert with another
//   handle to the resident object; nothing is replaced.
// - Ranges: the multi map keeps equal keys in insertion order and
//   releases their entries one at a time, by identity.
// - Liveness: entries leave on their final release, wherever it happens.
use managed_table::{ManagedMap, ManagedMultiMap};
use std::thread;

// Test: alias on duplicate insert.
// Assumes: the offered object is dropped when the key is taken.
// Verifies: both handles reach the original object; the flag tells the
// caller which case happened.
#[test]
fn duplicate_insert_aliases() {
    let map = ManagedMap::new();
    let (first, fresh) = map.insert("key".to_owned(), "original".to_owned());
    assert!(fresh);

    let (second, fresh) = map.insert("key".to_owned(), "loser".to_owned());
    assert!(!fresh);
    assert_eq!(second.object(), "original");
    assert_eq!(second.entry_id(), first.entry_id());
    assert_eq!(first.use_count(), 2);
    assert_eq!(map.len(), 1);

    drop(first);
    assert!(map.contains("key"));
    drop(second);
    assert!(map.is_empty());
}

// Test: release and re-register.
// Assumes: the final release frees the key.
// Verifies: a later insert under the same key is a fresh entry.
#[test]
fn key_is_free_after_final_release() {
    let map = ManagedMap::new();
    let (first, _) = map.insert(1u32, "v1".to_owned());
    let first_id = first.entry_id();
    drop(first);
    assert!(!map.contains(&1));

    let (second, fresh) = map.insert(1u32, "v2".to_owned());
    assert!(fresh);
    assert_ne!(second.entry_id(), first_id);
    assert_eq!(second.object(), "v2");
    drop(second);
}

// Test: borrowed lookups against owned keys.
// Assumes: `K: Borrow<Q>` lookups work like BTreeMap's.
// Verifies: get/contains/use_count accept `&str` for String keys.
#[test]
fn borrowed_key_lookups() {
    let map = ManagedMap::new();
    let (handle, _) = map.insert("borrow".to_owned(), 3u64);
    assert!(map.contains("borrow"));
    assert_eq!(map.count("borrow"), 1);
    assert_eq!(map.use_count("borrow"), Some(1));

    let found = map.get("borrow").unwrap();
    assert_eq!(*found.object(), 3);
    drop((handle, found));
    assert_eq!(map.use_count("borrow"), None);
}

// Test: multi map equal range order and release.
// Assumes: entries under one key stay in insertion order; get answers
// with the oldest.
// Verifies: per-entry release keeps the rest of the range reachable.
#[test]
fn equal_range_is_oldest_first_and_releases_itemwise() {
    let map = ManagedMultiMap::new();
    let a = map.insert("k".to_owned(), 1u32);
    let b = map.insert("k".to_owned(), 2u32);
    let c = map.insert("k".to_owned(), 3u32);
    assert_eq!(map.count("k"), 3);
    assert_eq!(map.len(), 3);

    let oldest = map.get("k").unwrap();
    assert_eq!(oldest.entry_id(), a.entry_id());
    drop(oldest);

    let all = map.get_all("k");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].entry_id(), a.entry_id());
    assert_eq!(all[2].entry_id(), c.entry_id());
    drop(all);

    // Release the middle entry; the neighbors stay.
    drop(b);
    assert_eq!(map.count("k"), 2);
    let all = map.get_all("k");
    assert_eq!(all[0].entry_id(), a.entry_id());
    assert_eq!(all[1].entry_id(), c.entry_id());
    drop(all);

    drop((a, c));
    assert!(!map.contains("k"));
    assert!(map.is_empty());
}

// Test: identity addressing in the multi map.
// Assumes: get_at resolves key plus identity; use_counts are per entry.
#[test]
fn get_at_addresses_one_entry() {
    let map = ManagedMultiMap::new();
    let a = map.insert(5u32, "a".to_owned());
    let b = map.insert(5u32, "b".to_owned());

    let picked = map.get_at(&5, b.entry_id()).unwrap();
    assert_eq!(picked.object(), "b");
    assert_eq!(map.use_counts(&5), vec![1, 2]);
    assert!(map.get_at(&6, b.entry_id()).is_none());

    drop((a, b, picked));
    assert!(map.is_empty());
}

// Test: concurrent aliasing on one key.
// Scenario: threads race to insert the same key; exactly one object
// wins and everyone's handle aliases it.
// Verifies: len stays 1 and the object is one of the offered values.
#[test]
fn concurrent_inserts_alias_one_winner() {
    let map = ManagedMap::new();
    let winners = thread::scope(|scope| {
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let map = &map;
                scope.spawn(move || {
                    let (handle, fresh) = map.insert("contested".to_owned(), t);
                    (fresh, *handle.object(), handle)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("no panic"))
            .collect::<Vec<_>>()
    });

    assert_eq!(map.len(), 1);
    let fresh_count = winners.iter().filter(|(fresh, _, _)| *fresh).count();
    assert_eq!(fresh_count, 1, "exactly one insert may be fresh");
    let resident = *map.get("contested").unwrap().object();
    for (_, seen, handle) in &winners {
        assert_eq!(*seen, resident);
        assert_eq!(*handle.object(), resident);
    }
    drop(winners);
    assert!(map.is_empty());
}
