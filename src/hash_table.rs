//! Sharded concurrent hash table: open hashing with per-bucket chains and
//! 16-way lock striping.
//!
//! # Design
//!
//! The table keeps a prime number of buckets. Bucket `b` lives in stripe
//! `b % 16`, so each stripe guards every sixteenth bucket with one
//! [`RwLock`]. A key's stripe therefore depends on the current bucket
//! count, which only changes while *all* stripes are write-locked
//! (rehash). Lock acquisition re-validates the stripe choice after the
//! lock is held and retries if a rehash slipped in between; see
//! [`HashTable::read_shard`].
//!
//! Buckets are singly linked chains of heap nodes. Entries never move
//! between nodes: a rehash relinks the existing nodes under the new
//! bucket count instead of reallocating them.
//!
//! Growth doubles the bucket count (rounded up to the next prime) and is
//! driven either automatically from the configured load factor or, for
//! the reference-counted wrappers in this crate, by the owner before it
//! takes any stripe lock. The bucket count never shrinks.
//!
//! # Closures under locks
//!
//! `with_match`, `with_matches`, `with_first` and `insert_entry_with` run
//! caller code while a stripe lock is held. Such closures must not call
//! back into the same table, and their key's `Hash`/`Eq` must not either;
//! both would deadlock on the held stripe.

use std::array;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of lock stripes. Bucket `b` is guarded by stripe `b % SHARD_COUNT`.
pub(crate) const SHARD_COUNT: usize = 16;

/// Initial bucket count, a small prime.
const DEFAULT_BUCKET_COUNT: usize = 131;

/// Default growth threshold for automatically growing tables.
const DEFAULT_LOAD_FACTOR: f64 = 0.75;

/// Access to the hash key of a stored entry.
///
/// Implemented by `(K, V)` pairs for map-style tables and by [`Element`]
/// for set-style tables where the stored value is its own key.
pub trait TableEntry {
    type Key: Hash + Eq;

    fn key(&self) -> &Self::Key;
}

impl<K: Hash + Eq, V> TableEntry for (K, V) {
    type Key = K;

    fn key(&self) -> &K {
        &self.0
    }
}

/// Entry wrapper for set-style tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<T>(pub T);

impl<T: Hash + Eq> TableEntry for Element<T> {
    type Key = T;

    fn key(&self) -> &T {
        &self.0
    }
}

/// Unique-key concurrent hash map.
pub type ConcurrentMap<K, V, S = RandomState> = HashTable<(K, V), S, false>;
/// Concurrent hash map where one key may hold several entries.
pub type ConcurrentMultiMap<K, V, S = RandomState> = HashTable<(K, V), S, true>;
/// Unique-value concurrent hash set.
pub type ConcurrentSet<T, S = RandomState> = HashTable<Element<T>, S, false>;
/// Concurrent hash set that keeps equal values as separate entries.
pub type ConcurrentMultiSet<T, S = RandomState> = HashTable<Element<T>, S, true>;

struct Node<E> {
    entry: E,
    next: Link<E>,
}

type Link<E> = Option<Box<Node<E>>>;

struct Shard<E> {
    /// Chain heads for the buckets `b` with `b % SHARD_COUNT` equal to
    /// this stripe's index, stored at local index `b / SHARD_COUNT`.
    buckets: Vec<Link<E>>,
}

impl<E> Drop for Shard<E> {
    fn drop(&mut self) {
        // Chains can be long under adversarial hashing; unlink nodes
        // iteratively instead of recursing through `Box` drops.
        for head in &mut self.buckets {
            let mut cur = head.take();
            while let Some(mut node) = cur {
                cur = node.next.take();
            }
        }
    }
}

/// Lock-striped chained hash table.
///
/// `MULTI` selects the key discipline: `false` rejects duplicate keys,
/// `true` accumulates them. The concrete map/set shapes are the
/// [`ConcurrentMap`], [`ConcurrentMultiMap`], [`ConcurrentSet`] and
/// [`ConcurrentMultiSet`] aliases.
///
/// All operations take `&self`; the table is `Sync` and meant to be
/// shared across threads, behind an `Arc` or borrowed from a scope.
pub struct HashTable<E, S = RandomState, const MULTI: bool = false> {
    shards: [RwLock<Shard<E>>; SHARD_COUNT],
    /// Current bucket count. Changes only while every stripe is
    /// write-locked; published with `Release`, read with `Acquire`.
    bucket_count: AtomicUsize,
    /// Entry count, updated under stripe locks, readable without one.
    len: AtomicUsize,
    /// Growth threshold, stored as `f64` bits.
    load_factor_bits: AtomicU64,
    /// Whether inserts grow the table themselves. The reference-counted
    /// wrappers disable this and grow before taking any stripe lock.
    auto_grow: bool,
    hasher: S,
}

impl<E: TableEntry, S: BuildHasher + Default, const MULTI: bool> HashTable<E, S, MULTI> {
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// A table pre-sized so `capacity` entries fit under the default load
    /// factor without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<E: TableEntry, S: BuildHasher + Default, const MULTI: bool> Default
    for HashTable<E, S, MULTI>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, S, const MULTI: bool> HashTable<E, S, MULTI> {
    /// Number of entries. A snapshot; concurrent inserts and erases move
    /// it immediately.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: TableEntry, S: BuildHasher, const MULTI: bool> HashTable<E, S, MULTI> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::build(DEFAULT_BUCKET_COUNT, DEFAULT_LOAD_FACTOR, true, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        let buckets = buckets_for(capacity, DEFAULT_LOAD_FACTOR);
        Self::build(buckets, DEFAULT_LOAD_FACTOR, true, hasher)
    }

    /// A table that never grows on its own. The owner grows it through
    /// [`rehash`](Self::rehash) before taking any stripe lock; one spare
    /// bucket gives `capacity` entries headroom under that policy.
    pub(crate) fn with_manual_growth(capacity: usize, hasher: S) -> Self {
        let buckets = DEFAULT_BUCKET_COUNT.max(capacity.saturating_add(1));
        Self::build(buckets, DEFAULT_LOAD_FACTOR, false, hasher)
    }

    fn build(buckets: usize, load_factor: f64, auto_grow: bool, hasher: S) -> Self {
        let bucket_count = next_prime(buckets);
        Self {
            shards: array::from_fn(|shard| {
                let mut heads = Vec::new();
                heads.resize_with(bucket_slots(bucket_count, shard), || None);
                RwLock::new(Shard { buckets: heads })
            }),
            bucket_count: AtomicUsize::new(bucket_count),
            len: AtomicUsize::new(0),
            load_factor_bits: AtomicU64::new(load_factor.to_bits()),
            auto_grow,
            hasher,
        }
    }

    /// Current bucket count. Monotonically non-decreasing.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count.load(Ordering::Acquire)
    }

    pub fn load_factor(&self) -> f64 {
        f64::from_bits(self.load_factor_bits.load(Ordering::Relaxed))
    }

    /// Sets the growth threshold for automatically growing tables.
    pub fn set_load_factor(&self, load_factor: f64) {
        self.load_factor_bits
            .store(load_factor.to_bits(), Ordering::Relaxed);
    }

    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Stripe owning `hash`'s bucket under the current bucket count.
    fn shard_index(&self, hash: u64) -> usize {
        let buckets = self.bucket_count.load(Ordering::Acquire) as u64;
        (hash % buckets) as usize & (SHARD_COUNT - 1)
    }

    /// Local position of `hash`'s bucket inside its stripe. Only valid
    /// while a lock on that stripe is held, which pins the bucket count.
    fn local_bucket(&self, hash: u64) -> usize {
        let buckets = self.bucket_count.load(Ordering::Acquire) as u64;
        (hash % buckets) as usize / SHARD_COUNT
    }

    /// Read-locks the stripe owning `hash`'s bucket.
    ///
    /// The stripe is chosen from the bucket count, and a rehash may change
    /// the bucket count between choosing and locking. Holding any stripe
    /// lock excludes rehashes, so the choice is re-validated under the
    /// lock and the acquisition retried until it is stable.
    fn read_shard(&self, hash: u64) -> RwLockReadGuard<'_, Shard<E>> {
        let mut shard = self.shard_index(hash);
        loop {
            let guard = self.shards[shard].read();
            let current = self.shard_index(hash);
            if current == shard {
                return guard;
            }
            drop(guard);
            shard = current;
        }
    }

    /// Write-locking variant of [`read_shard`](Self::read_shard).
    fn write_shard(&self, hash: u64) -> RwLockWriteGuard<'_, Shard<E>> {
        let mut shard = self.shard_index(hash);
        loop {
            let guard = self.shards[shard].write();
            let current = self.shard_index(hash);
            if current == shard {
                return guard;
            }
            drop(guard);
            shard = current;
        }
    }

    /// Write-locks every stripe in ascending index order, so concurrent
    /// all-stripe holders cannot deadlock each other.
    fn write_all(&self) -> Vec<RwLockWriteGuard<'_, Shard<E>>> {
        self.shards.iter().map(|shard| shard.write()).collect()
    }

    fn read_all(&self) -> Vec<RwLockReadGuard<'_, Shard<E>>> {
        self.shards.iter().map(|shard| shard.read()).collect()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_match(key, |_| ()).is_some()
    }

    /// Number of entries stored under `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let shard = self.read_shard(hash);
        let mut count = 0;
        chain_for_each(&shard.buckets[self.local_bucket(hash)], key, &mut |_| {
            count += 1;
        });
        count
    }

    /// Runs `f` on the first entry matching `key` while the stripe lock
    /// is held. See the module notes on closures under locks.
    pub fn with_match<Q, R>(&self, key: &Q, f: impl FnOnce(&E) -> R) -> Option<R>
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let shard = self.read_shard(hash);
        chain_find(&shard.buckets[self.local_bucket(hash)], key).map(f)
    }

    /// Runs `f` on each entry matching `key`, in chain order, and returns
    /// the first `Some`. Used to address one entry of an equal range.
    pub fn with_first<Q, R>(&self, key: &Q, mut f: impl FnMut(&E) -> Option<R>) -> Option<R>
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let shard = self.read_shard(hash);
        let mut cur = &shard.buckets[self.local_bucket(hash)];
        while let Some(node) = cur {
            if node.entry.key().borrow() == key {
                if let Some(result) = f(&node.entry) {
                    return Some(result);
                }
            }
            cur = &node.next;
        }
        None
    }

    /// Runs `f` on every entry matching `key`, in chain order, collecting
    /// the results.
    pub fn with_matches<Q, R>(&self, key: &Q, mut f: impl FnMut(&E) -> R) -> Vec<R>
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let shard = self.read_shard(hash);
        let mut results = Vec::new();
        chain_for_each(&shard.buckets[self.local_bucket(hash)], key, &mut |entry| {
            results.push(f(entry));
        });
        results
    }

    /// Clone of the first entry matching `key`.
    pub fn get_entry<Q>(&self, key: &Q) -> Option<E>
    where
        E: Clone,
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_match(key, E::clone)
    }

    /// Clones of every entry matching `key`, in chain order.
    pub fn get_entries<Q>(&self, key: &Q) -> Vec<E>
    where
        E: Clone,
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_matches(key, E::clone)
    }

    /// Removes every entry matching `key`; returns how many were removed.
    pub fn erase<Q>(&self, key: &Q) -> usize
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let mut shard = self.write_shard(hash);
        let local = self.local_bucket(hash);
        let removed = chain_remove_all(&mut shard.buckets[local], key);
        if removed > 0 {
            self.len.fetch_sub(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Removes the first entry matching `key` that also satisfies `pred`,
    /// returning it. `pred` runs under the stripe's write lock.
    pub fn erase_if<Q>(&self, key: &Q, pred: impl FnMut(&E) -> bool) -> Option<E>
    where
        E::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let mut shard = self.write_shard(hash);
        let local = self.local_bucket(hash);
        let removed = chain_remove_first(&mut shard.buckets[local], key, pred);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Grows to at least `buckets` buckets, rounded up to the next prime,
    /// and re-buckets every entry. Requests at or below the current count
    /// are ignored; the table never shrinks.
    pub fn rehash(&self, buckets: usize) {
        self.rehash_to(buckets);
    }

    /// Grows so `entries` entries fit without further growth.
    pub fn reserve(&self, entries: usize) {
        let by_factor = (entries as f64 / self.load_factor()).ceil() as usize;
        self.rehash_to(entries.saturating_add(1).max(by_factor));
    }

    /// Removes every entry. The bucket count is left as grown.
    pub fn clear(&self) {
        let mut guards = self.write_all();
        for shard in guards.iter_mut() {
            for head in &mut shard.buckets {
                let mut cur = head.take();
                while let Some(mut node) = cur {
                    cur = node.next.take();
                }
            }
        }
        self.len.store(0, Ordering::Relaxed);
    }

    fn grow_if_needed(&self) {
        if !self.auto_grow {
            return;
        }
        let buckets = self.bucket_count.load(Ordering::Acquire);
        let len = self.len.load(Ordering::Relaxed);
        if len as f64 > buckets as f64 * self.load_factor() {
            self.rehash_to(buckets.saturating_mul(2));
        }
    }

    fn rehash_to(&self, buckets: usize) {
        let mut guards = self.write_all();
        let current = self.bucket_count.load(Ordering::Acquire);
        let target = next_prime(buckets);
        if target <= current {
            // Raced with another grower, or asked to shrink.
            return;
        }

        // Unlink every node; the nodes themselves are reused.
        let mut nodes: Vec<Box<Node<E>>> = Vec::with_capacity(self.len.load(Ordering::Relaxed));
        for shard in guards.iter_mut() {
            for head in &mut shard.buckets {
                let mut cur = head.take();
                while let Some(mut node) = cur {
                    cur = node.next.take();
                    nodes.push(node);
                }
            }
        }

        for (index, shard) in guards.iter_mut().enumerate() {
            shard.buckets.clear();
            shard.buckets.resize_with(bucket_slots(target, index), || None);
        }
        self.bucket_count.store(target, Ordering::Release);

        for mut node in nodes {
            let hash = self.hash_of(node.entry.key());
            let bucket = (hash % target as u64) as usize;
            let head = &mut guards[bucket % SHARD_COUNT].buckets[bucket / SHARD_COUNT];
            node.next = head.take();
            *head = Some(node);
        }
    }
}

impl<E: TableEntry, S: BuildHasher> HashTable<E, S, false> {
    /// Inserts `entry` if its key is absent and runs `f` on the freshly
    /// linked entry while the stripe lock is still held.
    ///
    /// Returns `None` when an equal key is already resident: `entry` is
    /// dropped and the resident entry is left untouched.
    pub fn insert_entry_with<R>(&self, entry: E, f: impl FnOnce(&E) -> R) -> Option<R> {
        self.grow_if_needed();
        let hash = self.hash_of(entry.key());
        let mut shard = self.write_shard(hash);
        let local = self.local_bucket(hash);
        let bucket = &mut shard.buckets[local];
        if chain_find(bucket, entry.key()).is_some() {
            return None;
        }
        let linked = chain_push(bucket, entry);
        self.len.fetch_add(1, Ordering::Relaxed);
        Some(f(linked))
    }

    /// Inserts `entry` if its key is absent; `false` when the key was
    /// already taken.
    pub fn insert_entry(&self, entry: E) -> bool {
        self.insert_entry_with(entry, |_| ()).is_some()
    }
}

impl<E: TableEntry, S: BuildHasher> HashTable<E, S, true> {
    /// Links `entry` (equal keys accumulate) and runs `f` on it while the
    /// stripe lock is still held. New entries sit at the chain head, so
    /// first-match lookups see the latest insert for a key.
    pub fn insert_entry_with<R>(&self, entry: E, f: impl FnOnce(&E) -> R) -> R {
        self.grow_if_needed();
        let hash = self.hash_of(entry.key());
        let mut shard = self.write_shard(hash);
        let local = self.local_bucket(hash);
        let linked = chain_push(&mut shard.buckets[local], entry);
        self.len.fetch_add(1, Ordering::Relaxed);
        f(linked)
    }

    pub fn insert_entry(&self, entry: E) {
        self.insert_entry_with(entry, |_| ());
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> HashTable<(K, V), S, false> {
    /// Inserts `key -> value`; `false` when the key was already taken.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.insert_entry((key, value))
    }

    /// Clone of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        V: Clone,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_match(key, |entry| entry.1.clone())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> HashTable<(K, V), S, true> {
    pub fn insert(&self, key: K, value: V) {
        self.insert_entry((key, value));
    }

    /// Clone of the first value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        V: Clone,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_match(key, |entry| entry.1.clone())
    }

    /// Clones of every value stored under `key`, in chain order.
    pub fn get_all<Q>(&self, key: &Q) -> Vec<V>
    where
        V: Clone,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_matches(key, |entry| entry.1.clone())
    }
}

impl<T: Hash + Eq, S: BuildHasher> HashTable<Element<T>, S, false> {
    /// Inserts `value`; `false` when an equal value was already present.
    pub fn insert(&self, value: T) -> bool {
        self.insert_entry(Element(value))
    }
}

impl<T: Hash + Eq, S: BuildHasher> HashTable<Element<T>, S, true> {
    pub fn insert(&self, value: T) {
        self.insert_entry(Element(value));
    }
}

impl<E: TableEntry + Clone, S: BuildHasher + Clone, const MULTI: bool> Clone
    for HashTable<E, S, MULTI>
{
    /// Deep copy under read locks on every stripe; concurrent writers are
    /// held off for the duration, so the copy is a consistent snapshot.
    fn clone(&self) -> Self {
        let guards = self.read_all();
        let bucket_count = self.bucket_count.load(Ordering::Acquire);
        let mut clone = Self::build(
            bucket_count,
            self.load_factor(),
            self.auto_grow,
            self.hasher.clone(),
        );
        for (index, shard) in guards.iter().enumerate() {
            let fresh = clone.shards[index].get_mut();
            for (local, head) in shard.buckets.iter().enumerate() {
                let mut out = &mut fresh.buckets[local];
                let mut cur = head;
                while let Some(node) = cur {
                    let linked = out.insert(Box::new(Node {
                        entry: node.entry.clone(),
                        next: None,
                    }));
                    out = &mut linked.next;
                    cur = &node.next;
                }
            }
        }
        let len = self.len.load(Ordering::Relaxed);
        clone.len.store(len, Ordering::Relaxed);
        clone
    }
}

impl<E, S, const MULTI: bool> fmt::Debug for HashTable<E, S, MULTI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("bucket_count", &self.bucket_count.load(Ordering::Acquire))
            .field("multi", &MULTI)
            .finish()
    }
}

/// Links `entry` at the chain head and returns a reference to it.
fn chain_push<E>(head: &mut Link<E>, entry: E) -> &E {
    let next = head.take();
    let node = head.insert(Box::new(Node { entry, next }));
    &node.entry
}

fn chain_find<'a, E, Q>(head: &'a Link<E>, key: &Q) -> Option<&'a E>
where
    E: TableEntry,
    E::Key: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut cur = head;
    while let Some(node) = cur {
        if node.entry.key().borrow() == key {
            return Some(&node.entry);
        }
        cur = &node.next;
    }
    None
}

fn chain_for_each<'a, E, Q, F>(head: &'a Link<E>, key: &Q, f: &mut F)
where
    E: TableEntry,
    E::Key: Borrow<Q>,
    Q: Eq + ?Sized,
    F: FnMut(&'a E),
{
    let mut cur = head;
    while let Some(node) = cur {
        if node.entry.key().borrow() == key {
            f(&node.entry);
        }
        cur = &node.next;
    }
}

/// Unlinks the first entry matching `key` and `pred`, returning it.
fn chain_remove_first<E, Q, F>(head: &mut Link<E>, key: &Q, mut pred: F) -> Option<E>
where
    E: TableEntry,
    E::Key: Borrow<Q>,
    Q: Eq + ?Sized,
    F: FnMut(&E) -> bool,
{
    let mut cur = head;
    loop {
        let matched = match cur {
            None => return None,
            Some(node) => node.entry.key().borrow() == key && pred(&node.entry),
        };
        if matched {
            let node = cur.take()?;
            let node = *node;
            *cur = node.next;
            return Some(node.entry);
        }
        cur = match cur {
            Some(node) => &mut node.next,
            None => return None,
        };
    }
}

/// Unlinks every entry matching `key`, returning how many were removed.
fn chain_remove_all<E, Q>(head: &mut Link<E>, key: &Q) -> usize
where
    E: TableEntry,
    E::Key: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut removed = 0;
    let mut cur = head;
    loop {
        let matched = match cur {
            None => return removed,
            Some(node) => node.entry.key().borrow() == key,
        };
        if matched {
            if let Some(node) = cur.take() {
                let node = *node;
                *cur = node.next;
                removed += 1;
            }
            // `cur` now holds the unlinked node's successor.
            continue;
        }
        cur = match cur {
            Some(node) => &mut node.next,
            None => return removed,
        };
    }
}

/// Buckets owned by `shard` when `total` buckets exist: the residues
/// `shard, shard + 16, shard + 32, ...` below `total`.
fn bucket_slots(total: usize, shard: usize) -> usize {
    (total + SHARD_COUNT - 1 - shard) / SHARD_COUNT
}

fn buckets_for(capacity: usize, load_factor: f64) -> usize {
    if capacity == 0 {
        return DEFAULT_BUCKET_COUNT;
    }
    let needed = (capacity as f64 / load_factor).ceil() as usize;
    DEFAULT_BUCKET_COUNT.max(needed)
}

/// Smallest prime at or above `n`, by trial division. Bucket counts stay
/// small enough (doublings of 131) that this is never a hot path.
fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    if candidate > 2 && candidate % 2 == 0 {
        candidate += 1;
    }
    while !is_prime(candidate) {
        candidate += 2;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut divisor = 3;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}
