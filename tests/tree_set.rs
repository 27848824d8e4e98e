// Ordered managed set integration suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Aliasing: the unique set answers an equal insert with another
//   handle to the resident entry.
// - Ranges: the multi set keeps equal values as separate entries in
//   insertion order, each with its own count, and stays reachable even
//   when the entry anchoring the tree key is the one released.
use managed_table::{ManagedMultiSet, ManagedSet};

// Test: alias on equal insert.
// Assumes: the offered value is dropped when an equal one is resident.
// Verifies: one entry, shared count, freed only by the last handle.
#[test]
fn equal_insert_aliases() {
    let set = ManagedSet::new();
    let (first, fresh) = set.insert("v".to_owned());
    assert!(fresh);
    let (second, fresh) = set.insert("v".to_owned());
    assert!(!fresh);

    assert_eq!(first.entry_id(), second.entry_id());
    assert_eq!(first.use_count(), 2);
    assert_eq!(set.len(), 1);
    assert_eq!(set.count(&"v".to_owned()), 1);

    drop(first);
    assert!(set.contains(&"v".to_owned()));
    drop(second);
    assert!(set.is_empty());
}

// Test: lookups pin entries.
// Verifies: get extends the entry's lifetime past the insert handle.
#[test]
fn get_pins_the_entry() {
    let set = ManagedSet::new();
    let (original, _) = set.insert(9u64);
    let pinned = set.get(&9).unwrap();
    assert_eq!(set.use_count(&9), Some(2));
    drop(original);
    assert!(set.contains(&9));
    drop(pinned);
    assert!(!set.contains(&9));
}

// Test: multi set ranges are separate entries.
// Assumes: equal values accumulate; get answers with the oldest entry.
// Verifies: identities differ, counts are per entry, release itemwise.
#[test]
fn equal_values_form_a_range() {
    let set = ManagedMultiSet::new();
    let a = set.insert(3u32);
    let b = set.insert(3u32);
    assert_ne!(a.entry_id(), b.entry_id());
    assert_eq!(set.count(&3), 2);
    assert_eq!(set.len(), 2);

    let oldest = set.get(&3).unwrap();
    assert_eq!(oldest.entry_id(), a.entry_id());
    drop(oldest);

    let picked = set.get_at(&3, b.entry_id()).unwrap();
    assert_eq!(picked.entry_id(), b.entry_id());
    assert_eq!(set.use_counts(&3), vec![1, 2]);
    drop(picked);

    drop(b);
    assert_eq!(set.count(&3), 1);
    drop(a);
    assert!(set.is_empty());
}

// Test: releasing the range's oldest entry first.
// Scenario: the oldest entry of an equal range doubles as the tree key;
// releasing it must not take the rest of the range with it.
// Verifies: survivors stay reachable through every lookup form.
#[test]
fn releasing_the_oldest_keeps_the_range_reachable() {
    let set = ManagedMultiSet::new();
    let first = set.insert("r".to_owned());
    let second = set.insert("r".to_owned());
    let third = set.insert("r".to_owned());

    drop(first);
    assert_eq!(set.count(&"r".to_owned()), 2);
    assert!(set.contains(&"r".to_owned()));

    let oldest = set.get(&"r".to_owned()).unwrap();
    assert_eq!(oldest.entry_id(), second.entry_id());
    let all = set.get_all(&"r".to_owned());
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].entry_id(), third.entry_id());
    drop((oldest, all));

    // Walk the remaining entries out the same way.
    drop(second);
    assert_eq!(set.count(&"r".to_owned()), 1);
    let survivor = set.get(&"r".to_owned()).unwrap();
    assert_eq!(survivor.entry_id(), third.entry_id());
    drop((survivor, third));
    assert!(set.is_empty());
}

// Test: distinct values sort independently.
// Verifies: releases of one value never disturb a neighbor.
#[test]
fn distinct_values_are_independent() {
    let set = ManagedMultiSet::new();
    let low = set.insert(1u8);
    let mid = set.insert(2u8);
    let high = set.insert(3u8);
    assert_eq!(set.len(), 3);

    drop(mid);
    assert!(set.contains(&1));
    assert!(!set.contains(&2));
    assert!(set.contains(&3));
    drop((low, high));
    assert!(set.is_empty());
}
