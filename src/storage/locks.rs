//! Multi-Key Lock Ordering
//!
//! Commands touching several keys atomically (MSET, RENAME, transactions)
//! lock every shard those keys map to, then work on the held shards through
//! a [`ShardLocks`] guard.
//!
//! ## Deadlock Avoidance
//!
//! Shard indices are deduplicated and acquired in one global ascending order:
//! all exclusive (write) shards first, then all shared (read) shards. Two
//! callers with overlapping shard sets therefore never hold a higher index
//! while waiting on a lower one. Release is the exact mirror: read shards
//! descending, then write shards descending.
//!
//! A shard needed for writing is never also read-locked. When a write key and
//! a read key land on the same shard (or the same key appears in both lists)
//! the shard is locked once, exclusively, and reads through it are served
//! from the write guard. `std::sync::RwLock` is not reentrant, so taking both
//! would deadlock the caller against itself.

use super::dict::{ConcurrentDict, ShardMap};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

impl<V: Clone> ConcurrentDict<V> {
    /// Maps `keys` to their distinct shard indices, sorted ascending (or
    /// descending when `reverse` is set).
    pub fn to_lock_indices<K: AsRef<[u8]>>(&self, keys: &[K], reverse: bool) -> Vec<usize> {
        let indices: BTreeSet<usize> = keys
            .iter()
            .map(|key| self.shard_index(key.as_ref()))
            .collect();

        if reverse {
            indices.into_iter().rev().collect()
        } else {
            indices.into_iter().collect()
        }
    }

    /// Locks the shards of `write_keys` exclusively and the remaining shards
    /// of `read_keys` shared, in deadlock-free order.
    ///
    /// The locks are released when the returned guard is dropped (or passed
    /// to [`ShardLocks::unlock`]).
    ///
    /// # Example
    ///
    /// ```
    /// use shardkv::storage::ConcurrentDict;
    /// use bytes::Bytes;
    ///
    /// let dict = ConcurrentDict::new(16);
    /// dict.put(Bytes::from("src"), Bytes::from("v"));
    ///
    /// // RENAME src dst
    /// let keys = [Bytes::from("src"), Bytes::from("dst")];
    /// let mut locked = dict.rw_locks(&keys, &[] as &[Bytes]);
    /// if let Some(value) = locked.remove(b"src") {
    ///     locked.put(Bytes::from("dst"), value);
    /// }
    /// locked.unlock();
    ///
    /// assert_eq!(dict.get(b"dst"), Some(Bytes::from("v")));
    /// ```
    pub fn rw_locks<W, R>(&self, write_keys: &[W], read_keys: &[R]) -> ShardLocks<'_, V>
    where
        W: AsRef<[u8]>,
        R: AsRef<[u8]>,
    {
        let write_indices = self.to_lock_indices(write_keys, false);
        let read_indices: Vec<usize> = self
            .to_lock_indices(read_keys, false)
            .into_iter()
            .filter(|index| write_indices.binary_search(index).is_err())
            .collect();

        let writes = write_indices
            .into_iter()
            .map(|index| (index, self.shard(index).write()))
            .collect();
        let reads = read_indices
            .into_iter()
            .map(|index| (index, self.shard(index).read()))
            .collect();

        ShardLocks {
            dict: self,
            writes,
            reads,
        }
    }
}

/// A set of shard locks held through [`ConcurrentDict::rw_locks`].
///
/// The methods mirror the dictionary's single-key operations but use the
/// locks already held instead of acquiring their own.
///
/// # Panics
///
/// Reading a key whose shard is not held, or writing a key whose shard is
/// not held exclusively, is a caller bug and panics.
pub struct ShardLocks<'a, V> {
    dict: &'a ConcurrentDict<V>,
    /// Ascending by shard index
    writes: Vec<(usize, RwLockWriteGuard<'a, ShardMap<V>>)>,
    /// Ascending by shard index, disjoint from `writes`
    reads: Vec<(usize, RwLockReadGuard<'a, ShardMap<V>>)>,
}

impl<'a, V: Clone> ShardLocks<'a, V> {
    /// Shard indices held exclusively, ascending.
    pub fn write_indices(&self) -> Vec<usize> {
        self.writes.iter().map(|(index, _)| *index).collect()
    }

    /// Shard indices held shared, ascending.
    pub fn read_indices(&self) -> Vec<usize> {
        self.reads.iter().map(|(index, _)| *index).collect()
    }

    fn position(held: impl Iterator<Item = usize>, index: usize) -> Option<usize> {
        held.enumerate()
            .find(|(_, held_index)| *held_index == index)
            .map(|(position, _)| position)
    }

    fn readable(&self, key: &[u8]) -> &ShardMap<V> {
        let index = self.dict.shard_index(key);
        if let Some(pos) = Self::position(self.writes.iter().map(|(i, _)| *i), index) {
            return &self.writes[pos].1;
        }
        if let Some(pos) = Self::position(self.reads.iter().map(|(i, _)| *i), index) {
            return &self.reads[pos].1;
        }
        panic!("shard {} is not locked by this guard", index);
    }

    fn writable(&mut self, key: &[u8]) -> &mut ShardMap<V> {
        let index = self.dict.shard_index(key);
        match Self::position(self.writes.iter().map(|(i, _)| *i), index) {
            Some(pos) => &mut self.writes[pos].1,
            None => panic!("shard {} is not write-locked by this guard", index),
        }
    }

    /// Like [`ConcurrentDict::get`] without taking a lock.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.readable(key).get(key)
    }

    /// Like [`ConcurrentDict::put`] without taking a lock.
    pub fn put(&mut self, key: Bytes, value: V) -> usize {
        let dict = self.dict;
        self.writable(&key).put(key, value, dict.counter())
    }

    /// Like [`ConcurrentDict::put_if_absent`] without taking a lock.
    pub fn put_if_absent(&mut self, key: Bytes, value: V) -> usize {
        let dict = self.dict;
        self.writable(&key).put_if_absent(key, value, dict.counter())
    }

    /// Like [`ConcurrentDict::put_if_exists`] without taking a lock.
    pub fn put_if_exists(&mut self, key: Bytes, value: V) -> usize {
        self.writable(&key).put_if_exists(key, value)
    }

    /// Like [`ConcurrentDict::remove`] without taking a lock.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let dict = self.dict;
        self.writable(key).remove(key, dict.counter())
    }

    /// Releases every held lock in reverse acquisition order.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<V> Drop for ShardLocks<'_, V> {
    fn drop(&mut self) {
        while let Some(read) = self.reads.pop() {
            drop(read);
        }
        while let Some(write) = self.writes.pop() {
            drop(write);
        }
    }
}

impl<V> std::fmt::Debug for ShardLocks<'_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardLocks")
            .field("writes", &self.writes.iter().map(|(i, _)| *i).collect::<Vec<_>>())
            .field("reads", &self.reads.iter().map(|(i, _)| *i).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    /// Finds two distinct keys that hash to the same shard.
    fn colliding_pair(dict: &ConcurrentDict<u32>) -> (Bytes, Bytes) {
        let first = key("k0");
        let target = dict.shard_index(&first);
        let second = (1..)
            .map(|i| key(&format!("k{}", i)))
            .find(|k| dict.shard_index(k) == target)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_to_lock_indices() {
        let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
        let keys: Vec<Bytes> = (0..40).map(|i| key(&format!("k{}", i))).collect();

        let ascending = dict.to_lock_indices(&keys, false);
        assert!(ascending.windows(2).all(|w| w[0] < w[1]));

        let descending = dict.to_lock_indices(&keys, true);
        assert!(descending.windows(2).all(|w| w[0] > w[1]));

        let mut reversed = descending.clone();
        reversed.reverse();
        assert_eq!(reversed, ascending);
    }

    #[test]
    fn test_to_lock_indices_dedupes() {
        let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
        let (a, b) = colliding_pair(&dict);
        assert_eq!(dict.to_lock_indices(&[a.clone(), b, a], false).len(), 1);
    }

    #[test]
    fn test_overlapping_write_and_read_lock_once() {
        let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
        let (a, b) = colliding_pair(&dict);

        // Same shard in both sets would self-deadlock if locked twice
        let locked = dict.rw_locks(&[a.clone()], &[b, a]);
        assert_eq!(locked.write_indices().len(), 1);
        assert!(locked.read_indices().is_empty());
    }

    #[test]
    fn test_operations_through_guard() {
        let dict = ConcurrentDict::new(16);
        dict.put(key("a"), 1);
        dict.put(key("r"), 10);

        {
            let mut locked = dict.rw_locks(&[key("a"), key("b")], &[key("r")]);
            assert_eq!(locked.get(b"r"), Some(10));
            assert_eq!(locked.get(b"a"), Some(1));
            assert_eq!(locked.put(key("b"), 2), 0);
            assert_eq!(locked.put_if_absent(key("b"), 3), 0);
            assert_eq!(locked.put_if_exists(key("a"), 5), 1);
            assert_eq!(locked.remove(b"a"), Some(5));
            assert_eq!(locked.put(key("a"), 6), 0);
        }

        assert_eq!(dict.get(b"a"), Some(6));
        assert_eq!(dict.get(b"b"), Some(2));
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn test_locks_released_on_unlock() {
        let dict = ConcurrentDict::new(16);
        let locked = dict.rw_locks(&[key("a")], &[key("b")]);
        locked.unlock();

        // Would block forever if the write lock on "a" were still held
        dict.put(key("a"), 1);
        assert_eq!(dict.get(b"a"), Some(1));
    }

    #[test]
    #[should_panic(expected = "not write-locked")]
    fn test_write_through_read_lock_panics() {
        let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
        let mut locked = dict.rw_locks(&[] as &[Bytes], &[key("a")]);
        locked.put(key("a"), 1);
    }

    #[test]
    #[should_panic(expected = "not locked")]
    fn test_read_of_unlocked_shard_panics() {
        let dict: ConcurrentDict<u32> = ConcurrentDict::new(16);
        let a = key("a");
        let other = (0..)
            .map(|i| key(&format!("x{}", i)))
            .find(|k| dict.shard_index(k) != dict.shard_index(&a))
            .unwrap();
        let locked = dict.rw_locks(&[a], &[] as &[Bytes]);
        locked.get(&other);
    }

    #[test]
    fn test_concurrent_overlapping_locks_do_not_deadlock() {
        let dict = Arc::new(ConcurrentDict::new(16));
        let keys: Arc<Vec<Bytes>> = Arc::new((0..64).map(|i| key(&format!("k{}", i))).collect());
        for k in keys.iter() {
            dict.put(k.clone(), 0u64);
        }

        let workers = 8;
        let rounds = 500;
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let dict = Arc::clone(&dict);
                let keys = Arc::clone(&keys);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..rounds {
                        let mut shuffled: Vec<Bytes> = keys.as_ref().clone();
                        shuffled.shuffle(&mut rng);
                        let writes = rng.gen_range(1..6);
                        let reads = rng.gen_range(0..6);
                        let (write_keys, rest) = shuffled.split_at(writes);
                        let read_keys = &rest[..reads];

                        let mut locked = dict.rw_locks(write_keys, read_keys);
                        for k in read_keys {
                            locked.get(k);
                        }
                        for k in write_keys {
                            let current = locked.get(k).unwrap_or(0);
                            locked.put(k.clone(), current + 1);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Every increment happened under an exclusive lock, so none were lost
        let total: u64 = keys.iter().map(|k| dict.get(k).unwrap()).sum();
        assert!(total >= (workers * rounds) as u64);
        assert_eq!(dict.len(), 64);
    }

    #[test]
    fn test_multi_key_transfer_is_atomic() {
        let dict = Arc::new(ConcurrentDict::new(16));
        let accounts: Vec<Bytes> = (0..10).map(|i| key(&format!("acct:{}", i))).collect();
        for a in &accounts {
            dict.put(a.clone(), 100i64);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dict = Arc::clone(&dict);
                let accounts = accounts.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..1000 {
                        let from = accounts.choose(&mut rng).unwrap().clone();
                        let to = accounts.choose(&mut rng).unwrap().clone();
                        let mut locked =
                            dict.rw_locks(&[from.clone(), to.clone()], &[] as &[Bytes]);
                        let a = locked.get(&from).unwrap();
                        locked.put(from.clone(), a - 1);
                        let b = locked.get(&to).unwrap();
                        locked.put(to, b + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: i64 = accounts.iter().map(|a| dict.get(a).unwrap()).sum();
        assert_eq!(total, 1000);
    }
}
