//! Sharded Concurrent Dictionary
//!
//! The storage primitive for the server: a fixed-size table of shards, each
//! owning a `HashMap` behind its own `RwLock`.
//!
//! ## Design Decisions
//!
//! 1. **Fixed table**: The shard count is a power of two chosen at
//!    construction and never changes, so a key maps to the same shard for
//!    the lifetime of the table. The multi-key lock protocol in
//!    [`super::locks`] depends on this.
//! 2. **FNV-1 hashing**: `shard = fnv32(key) & (table_size - 1)`.
//! 3. **Approximate length**: A single atomic counter sits beside the table.
//!    It is updated while the mutating shard's lock is held, but readers of
//!    [`ConcurrentDict::len`] take no lock, so under concurrent mutation the
//!    value may lag the true sum of shard sizes.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                  ConcurrentDict<V>                         │
//! │  count: AtomicI64 (approximate)                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌─────────┐     │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │Shard N-1│     │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │       │ RwLock  │     │
//! │  │ HashMap │ │ HashMap │ │ HashMap │       │ HashMap │     │
//! │  └─────────┘ └─────────┘ └─────────┘       └─────────┘     │
//! └────────────────────────────────────────────────────────────┘
//! ```

use crate::wildcard::{Pattern, MATCH_ALL};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Smallest table the dictionary will allocate.
pub const MIN_SHARD_COUNT: usize = 16;

/// Largest table the dictionary will allocate.
pub const MAX_SHARD_COUNT: usize = 1 << 30;

const FNV32_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV32_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1 (multiply, then xor) over the raw key bytes.
#[inline]
pub fn fnv32(key: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for &byte in key {
        hash = hash.wrapping_mul(FNV32_PRIME);
        hash ^= u32::from(byte);
    }
    hash
}

/// Rounds a requested shard count up to the table size actually used.
pub fn compute_capacity(requested: usize) -> usize {
    if requested <= MIN_SHARD_COUNT {
        return MIN_SHARD_COUNT;
    }
    requested
        .checked_next_power_of_two()
        .map_or(MAX_SHARD_COUNT, |n| n.min(MAX_SHARD_COUNT))
}

/// The map owned by one shard.
///
/// Every mutation goes through these methods so the live counter is updated
/// in exactly one place, whether the caller locked a single shard or holds a
/// set of shards through [`super::locks::ShardLocks`].
#[derive(Debug)]
pub(super) struct ShardMap<V> {
    entries: HashMap<Bytes, V>,
}

impl<V: Clone> ShardMap<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub(super) fn get(&self, key: &[u8]) -> Option<V> {
        self.entries.get(key).cloned()
    }

    /// Returns 1 if the key already existed, 0 on a fresh insert.
    pub(super) fn put(&mut self, key: Bytes, value: V, count: &AtomicI64) -> usize {
        if self.entries.insert(key, value).is_some() {
            1
        } else {
            count.fetch_add(1, Ordering::Relaxed);
            0
        }
    }

    /// Returns 1 if inserted, 0 if the key was already present.
    pub(super) fn put_if_absent(&mut self, key: Bytes, value: V, count: &AtomicI64) -> usize {
        if self.entries.contains_key(&key) {
            return 0;
        }
        self.entries.insert(key, value);
        count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Returns 1 if an existing value was replaced, 0 otherwise.
    pub(super) fn put_if_exists(&mut self, key: Bytes, value: V) -> usize {
        match self.entries.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    pub(super) fn remove(&mut self, key: &[u8], count: &AtomicI64) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn random_key<R: Rng>(&self, rng: &mut R) -> Option<Bytes> {
        self.entries.keys().choose(rng).cloned()
    }

    fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.entries.iter()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One independently locked partition of the table.
#[derive(Debug)]
pub(super) struct Shard<V> {
    map: RwLock<ShardMap<V>>,
}

impl<V: Clone> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(ShardMap::new()),
        }
    }

    /// Read-locks the shard. A poisoned lock is recovered: every mutation
    /// leaves the map consistent before it can panic.
    pub(super) fn read(&self) -> RwLockReadGuard<'_, ShardMap<V>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, ShardMap<V>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Position returned by [`ConcurrentDict::dict_scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCursor {
    /// Every shard has been visited
    Done,
    /// Resume from this shard index
    Next(usize),
    /// The pattern did not compile; the caller must stop and report an error
    Invalid,
}

impl ScanCursor {
    /// The wire form: 0 when done, -1 when invalid, otherwise the shard index.
    pub fn as_i64(self) -> i64 {
        match self {
            ScanCursor::Done => 0,
            ScanCursor::Next(index) => index as i64,
            ScanCursor::Invalid => -1,
        }
    }

    /// Parses a client-supplied cursor. Negative values are rejected.
    pub fn from_i64(cursor: i64) -> Option<usize> {
        usize::try_from(cursor).ok()
    }

    pub fn is_done(self) -> bool {
        self == ScanCursor::Done
    }
}

/// A thread-safe map from binary-safe keys to values of type `V`.
///
/// Values are returned by clone, so `V` is normally a cheap handle such as
/// `Bytes` or `Arc<T>`.
///
/// # Example
///
/// ```
/// use shardkv::storage::ConcurrentDict;
/// use bytes::Bytes;
///
/// let dict = ConcurrentDict::new(10);
/// assert_eq!(dict.shard_count(), 16);
///
/// assert_eq!(dict.put(Bytes::from("name"), Bytes::from("Ariz")), 0);
/// assert_eq!(dict.get(b"name"), Some(Bytes::from("Ariz")));
/// assert_eq!(dict.len(), 1);
/// ```
#[derive(Debug)]
pub struct ConcurrentDict<V> {
    table: Vec<Shard<V>>,
    count: AtomicI64,
}

impl<V: Clone> ConcurrentDict<V> {
    /// Creates a dictionary with at least `shard_count` shards, rounded up
    /// to a power of two no smaller than [`MIN_SHARD_COUNT`].
    pub fn new(shard_count: usize) -> Self {
        let capacity = compute_capacity(shard_count);
        let table = (0..capacity).map(|_| Shard::new()).collect();
        debug!(requested = shard_count, shards = capacity, "dictionary created");

        Self {
            table,
            count: AtomicI64::new(0),
        }
    }

    /// Number of shards in the table. Always a power of two.
    pub fn shard_count(&self) -> usize {
        self.table.len()
    }

    /// The shard index `key` belongs to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (fnv32(key) as usize) & (self.table.len() - 1)
    }

    pub(super) fn shard(&self, index: usize) -> &Shard<V> {
        &self.table[index]
    }

    pub(super) fn counter(&self) -> &AtomicI64 {
        &self.count
    }

    #[inline]
    fn shard_for(&self, key: &[u8]) -> &Shard<V> {
        self.shard(self.shard_index(key))
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.shard_for(key).read().get(key)
    }

    /// Inserts or overwrites `key`.
    ///
    /// Returns 1 if the key already existed (overwrite), 0 if it was newly
    /// inserted. Only a fresh insert bumps the live counter.
    pub fn put(&self, key: Bytes, value: V) -> usize {
        self.shard_for(&key).write().put(key, value, &self.count)
    }

    /// Inserts `key` only if it is missing. Returns 1 if inserted.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> usize {
        self.shard_for(&key)
            .write()
            .put_if_absent(key, value, &self.count)
    }

    /// Overwrites `key` only if it is present. Returns 1 if updated.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> usize {
        self.shard_for(&key).write().put_if_exists(key, value)
    }

    /// Removes `key`, returning the old value if there was one.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        self.shard_for(key).write().remove(key, &self.count)
    }

    /// Visits every entry, shard by shard in table order.
    ///
    /// Each shard is read-locked only while it is being visited, so this is
    /// a weak snapshot: writes to shards not yet visited are seen, writes to
    /// shards already visited are not. Returning `false` from `visit` stops
    /// the whole traversal.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Bytes, &V) -> bool,
    {
        for shard in &self.table {
            let map = shard.read();
            for (key, value) in map.iter() {
                if !visit(key, value) {
                    return;
                }
            }
        }
    }

    /// Collects every key, with the same consistency as [`Self::for_each`].
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Draws `limit` keys, possibly with duplicates.
    ///
    /// Each draw picks a uniformly random shard and then a random key within
    /// it, so sampling is uniform over shards rather than keys. If `limit`
    /// is at least [`Self::len`], all keys are returned.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        if limit >= self.len() {
            return self.keys();
        }

        let mut rng = rand::thread_rng();
        let mut result = Vec::with_capacity(limit);
        while result.len() < limit {
            let index = rng.gen_range(0..self.table.len());
            if let Some(key) = self.table[index].read().random_key(&mut rng) {
                result.push(key);
            }
        }
        result
    }

    /// Like [`Self::random_keys`] but discards duplicate draws.
    ///
    /// The loop only ends once `limit` distinct keys were seen, so a `limit`
    /// close to [`Self::len`] can take many draws.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        if limit >= self.len() {
            return self.keys();
        }

        let mut rng = rand::thread_rng();
        let mut result = HashSet::with_capacity(limit);
        while result.len() < limit {
            let index = rng.gen_range(0..self.table.len());
            if let Some(key) = self.table[index].read().random_key(&mut rng) {
                result.insert(key);
            }
        }
        result.into_iter().collect()
    }

    /// Empties the table.
    ///
    /// Every shard is write-locked in ascending order before anything is
    /// cleared, so no caller observes a partially cleared table.
    pub fn clear(&self) {
        let mut guards: Vec<_> = self.table.iter().map(Shard::write).collect();
        for map in guards.iter_mut() {
            map.clear();
        }
        self.count.store(0, Ordering::Relaxed);
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
    }

    /// Incremental pattern scan over the shard table.
    ///
    /// `cursor` is a shard index (0 starts a scan) and `count` a soft batch
    /// size. Matching keys are collected shard by shard; before taking the
    /// matches of a shard that would push the batch past `count`, the scan
    /// returns [`ScanCursor::Next`] pointing at that shard, provided at least
    /// one shard after `cursor` has been consumed. A single shard is always
    /// taken whole, so every call makes progress.
    ///
    /// The pattern `*` returns every key in one call regardless of `count`.
    /// A pattern that fails to compile yields no keys and
    /// [`ScanCursor::Invalid`].
    pub fn dict_scan(
        &self,
        cursor: usize,
        count: usize,
        pattern: &str,
    ) -> (Vec<Bytes>, ScanCursor) {
        if pattern == MATCH_ALL {
            return (self.keys(), ScanCursor::Done);
        }

        let pattern = match Pattern::compile(pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!(pattern, error = %e, "scan with invalid pattern");
                return (Vec::new(), ScanCursor::Invalid);
            }
        };

        let mut result = Vec::new();
        for index in cursor..self.table.len() {
            let map = self.table[index].read();
            let matched: Vec<Bytes> = map
                .iter()
                .filter(|(key, _)| pattern.matches(key))
                .map(|(key, _)| key.clone())
                .collect();
            drop(map);

            if result.len() + matched.len() > count && index > cursor {
                return (result, ScanCursor::Next(index));
            }
            result.extend(matched);
        }
        (result, ScanCursor::Done)
    }

    /// Exact number of entries, summed under each shard's read lock in turn.
    pub fn exact_len(&self) -> usize {
        self.table.iter().map(|shard| shard.read().len()).sum()
    }
}
