use super::chunk::{Bucket, Chunk, Cursor};
use super::{bucket_index, JenkinsState, DEFAULT_BUCKETS, DEFAULT_PAIRS_PER_CHUNK};

use crossbeam::utils::{Backoff, CachePadded};

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

/// Insert-only concurrent hash table.
///
/// Readers never lock. Writers take the insert lock of a single bucket, so
/// inserts into different buckets never contend. Entries are never removed
/// or moved before the table is dropped, which is why [`get`](Self::get) can
/// hand out plain references.
///
/// `C` is the number of pairs per chunk, `N` the number of buckets.
pub struct MonotonicHashTable<
    K,
    V,
    S = JenkinsState,
    const C: usize = DEFAULT_PAIRS_PER_CHUNK,
    const N: usize = DEFAULT_BUCKETS,
> {
    buckets: Box<[CachePadded<Bucket<K, V, C>>]>,
    hasher: S,
    _owns: PhantomData<(K, V)>,
}

unsafe impl<K: Send, V: Send, S: Send, const C: usize, const N: usize> Send
    for MonotonicHashTable<K, V, S, C, N>
{
}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync, const C: usize, const N: usize> Sync
    for MonotonicHashTable<K, V, S, C, N>
{
}

impl<K: Hash + Eq, V, S: BuildHasher + Default, const C: usize, const N: usize> Default
    for MonotonicHashTable<K, V, S, C, N>
{
    fn default() -> Self {
        MonotonicHashTable::with_hasher(S::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher + Default, const C: usize, const N: usize>
    MonotonicHashTable<K, V, S, C, N>
{
    pub fn new() -> MonotonicHashTable<K, V, S, C, N> {
        MonotonicHashTable::default()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher, const C: usize, const N: usize>
    MonotonicHashTable<K, V, S, C, N>
{
    pub fn with_hasher(hasher: S) -> MonotonicHashTable<K, V, S, C, N> {
        crate::bug_on!(C == 0 || N == 0, "hash table needs at least one bucket and one pair per chunk");
        MonotonicHashTable {
            buckets: (0..N).map(|_| CachePadded::new(Bucket::new())).collect(),
            hasher,
            _owns: PhantomData,
        }
    }

    fn bucket(&self, key: &K) -> &Bucket<K, V, C> {
        &self.buckets[bucket_index(&self.hasher, key, N)]
    }

    /// Lock-free lookup.
    pub fn get(&self, key: &K) -> Option<&V> {
        let bucket = self.bucket(key);
        let mut cursor = Cursor::new();
        let mut size = bucket.size.load(Ordering::Acquire);
        loop {
            if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, key) } {
                return Some(unsafe { (*chunk).value(slot) });
            }
            let current = bucket.size.load(Ordering::Acquire);
            if current == size {
                return None;
            }
            size = current;
        }
    }

    /// Returns the value stored for `key`, constructing and inserting it with
    /// `ctor` if absent. The boolean is `true` iff this call inserted.
    ///
    /// `ctor` runs at most once per distinct key over the table's lifetime,
    /// while the bucket's insert lock is held. It must not insert into the
    /// same table.
    pub fn get_and_insert<F>(&self, key: K, ctor: F) -> (&V, bool)
    where
        F: FnOnce(&K) -> V,
    {
        let bucket = self.bucket(&key);
        let mut cursor = Cursor::new();
        let backoff = Backoff::new();
        let mut size = bucket.size.load(Ordering::Acquire);
        loop {
            if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, &key) } {
                return (unsafe { (*chunk).value(slot) }, false);
            }
            if let Some(_guard) = bucket.insert_lock.try_lock() {
                size = bucket.size.load(Ordering::Acquire);
                if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, &key) } {
                    return (unsafe { (*chunk).value(slot) }, false);
                }
                let value = ctor(&key);
                let (chunk, slot) = unsafe { cursor.append(bucket, key, value, Chunk::allocate) };
                return (unsafe { (*chunk).value(slot) }, true);
            }
            backoff.snooze();
            size = bucket.size.load(Ordering::Acquire);
        }
    }

    /// Number of pairs, exact only in the absence of concurrent inserts.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.size.load(Ordering::Acquire) as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every pair. Serial only.
    pub fn iterate(&mut self, mut visit: impl FnMut(&K, &V)) {
        for bucket in self.buckets.iter_mut() {
            bucket.for_each(&mut visit);
        }
    }

    /// Drops every pair and releases all chunks. Serial only.
    pub fn free_all_chunks(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }
}

impl<K, V, S, const C: usize, const N: usize> Drop for MonotonicHashTable<K, V, S, C, N> {
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
    }
}
