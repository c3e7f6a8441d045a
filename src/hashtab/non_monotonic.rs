use super::chunk::{Bucket, Chunk, Cursor};
use super::{bucket_index, JenkinsState, DEFAULT_BUCKETS, DEFAULT_PAIRS_PER_CHUNK};

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Mutex, MutexGuard};

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

struct NmBucket<K, V, const C: usize> {
    inner: Bucket<K, V, C>,
    remove_lock: Mutex<()>,
    removing: AtomicBool,
    readers: AtomicU32,
}

impl<K, V, const C: usize> Deref for NmBucket<K, V, C> {
    type Target = Bucket<K, V, C>;
    fn deref(&self) -> &Bucket<K, V, C> {
        &self.inner
    }
}

struct ReaderGuard<'a, K, V, const C: usize> {
    bucket: &'a NmBucket<K, V, C>,
}

impl<'a, K, V, const C: usize> Drop for ReaderGuard<'a, K, V, C> {
    fn drop(&mut self) {
        self.bucket.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ExclusiveGuard<'a, K, V, const C: usize> {
    bucket: &'a NmBucket<K, V, C>,
    _lock: MutexGuard<'a, ()>,
}

impl<'a, K, V, const C: usize> Drop for ExclusiveGuard<'a, K, V, C> {
    fn drop(&mut self) {
        self.bucket.removing.store(false, Ordering::Release);
    }
}

impl<K, V, const C: usize> NmBucket<K, V, C> {
    fn new() -> NmBucket<K, V, C> {
        NmBucket {
            inner: Bucket::new(),
            remove_lock: Mutex::new(()),
            removing: AtomicBool::new(false),
            readers: AtomicU32::new(0),
        }
    }

    /// Registers the caller as a reader, waiting out any running removal.
    fn read(&self) -> ReaderGuard<'_, K, V, C> {
        let backoff = Backoff::new();
        loop {
            while self.removing.load(Ordering::Acquire) {
                backoff.snooze();
            }
            self.readers.fetch_add(1, Ordering::SeqCst);
            if !self.removing.load(Ordering::SeqCst) {
                return ReaderGuard { bucket: self };
            }
            // a remover won the race, step back so it can drain
            self.readers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Blocks new readers and spins until the in-flight ones have left.
    fn exclusive(&self) -> ExclusiveGuard<'_, K, V, C> {
        let lock = self.remove_lock.lock();
        self.removing.store(true, Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.readers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
        ExclusiveGuard {
            bucket: self,
            _lock: lock,
        }
    }
}

/// Concurrent hash table supporting removal.
///
/// Lookups and inserts register as readers of their bucket; a removal blocks
/// new readers of that bucket, drains the running ones, and then fills the
/// hole with the bucket's last pair. Chunks emptied by removals go to a free
/// list shared by all buckets and are reused by later inserts.
pub struct NonMonotonicHashTable<
    K,
    V,
    S = JenkinsState,
    const C: usize = DEFAULT_PAIRS_PER_CHUNK,
    const N: usize = DEFAULT_BUCKETS,
> {
    buckets: Box<[CachePadded<NmBucket<K, V, C>>]>,
    free_chunks: Mutex<Vec<Box<Chunk<K, V, C>>>>,
    hasher: S,
    _owns: PhantomData<(K, V)>,
}

unsafe impl<K: Send, V: Send, S: Send, const C: usize, const N: usize> Send
    for NonMonotonicHashTable<K, V, S, C, N>
{
}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync, const C: usize, const N: usize> Sync
    for NonMonotonicHashTable<K, V, S, C, N>
{
}

impl<K: Hash + Eq, V, S: BuildHasher + Default, const C: usize, const N: usize> Default
    for NonMonotonicHashTable<K, V, S, C, N>
{
    fn default() -> Self {
        NonMonotonicHashTable::with_hasher(S::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher + Default, const C: usize, const N: usize>
    NonMonotonicHashTable<K, V, S, C, N>
{
    pub fn new() -> NonMonotonicHashTable<K, V, S, C, N> {
        NonMonotonicHashTable::default()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher, const C: usize, const N: usize>
    NonMonotonicHashTable<K, V, S, C, N>
{
    pub fn with_hasher(hasher: S) -> NonMonotonicHashTable<K, V, S, C, N> {
        crate::bug_on!(C == 0 || N == 0, "hash table needs at least one bucket and one pair per chunk");
        NonMonotonicHashTable {
            buckets: (0..N).map(|_| CachePadded::new(NmBucket::new())).collect(),
            free_chunks: Mutex::new(Vec::new()),
            hasher,
            _owns: PhantomData,
        }
    }

    fn bucket(&self, key: &K) -> &NmBucket<K, V, C> {
        &self.buckets[bucket_index(&self.hasher, key, N)]
    }

    fn new_chunk(&self) -> *mut Chunk<K, V, C> {
        match self.free_chunks.lock().pop() {
            Some(chunk) => {
                chunk.next.store(ptr::null_mut(), Ordering::Relaxed);
                Box::into_raw(chunk)
            }
            None => Chunk::allocate(),
        }
    }

    /// Lookup returning a clone of the value.
    ///
    /// Not wait-free: while a [`remove`](Self::remove) or
    /// [`remove_if`](Self::remove_if) runs on the same bucket, `get` spins
    /// (with backoff) until the removal has compacted the bucket. Inserts
    /// never make it wait, and buckets without removals are read without
    /// waiting.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let bucket = self.bucket(key);
        let _reader = bucket.read();
        let mut cursor = Cursor::new();
        let mut size = bucket.size.load(Ordering::Acquire);
        loop {
            if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, key) } {
                return Some(unsafe { (*chunk).value(slot).clone() });
            }
            let current = bucket.size.load(Ordering::Acquire);
            if current == size {
                return None;
            }
            size = current;
        }
    }

    /// See [`MonotonicHashTable::get_and_insert`](super::MonotonicHashTable::get_and_insert).
    /// Reuses chunks from the free list before allocating.
    pub fn get_and_insert<F>(&self, key: K, ctor: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce(&K) -> V,
    {
        let bucket = self.bucket(&key);
        let _reader = bucket.read();
        let mut cursor = Cursor::new();
        let backoff = Backoff::new();
        let mut size = bucket.size.load(Ordering::Acquire);
        loop {
            if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, &key) } {
                return (unsafe { (*chunk).value(slot).clone() }, false);
            }
            if let Some(_guard) = bucket.insert_lock.try_lock() {
                size = bucket.size.load(Ordering::Acquire);
                if let Some((chunk, slot)) = unsafe { cursor.scan(bucket, size, &key) } {
                    return (unsafe { (*chunk).value(slot).clone() }, false);
                }
                let value = ctor(&key);
                let (chunk, slot) =
                    unsafe { cursor.append(bucket, key, value, || self.new_chunk()) };
                return (unsafe { (*chunk).value(slot).clone() }, true);
            }
            backoff.snooze();
            size = bucket.size.load(Ordering::Acquire);
        }
    }

    /// Removes `key`, returning the pair it held.
    pub fn remove_entry(&self, key: &K) -> Option<(K, V)> {
        let bucket = self.bucket(key);
        {
            let _reader = bucket.read();
            let size = bucket.size.load(Ordering::Acquire);
            unsafe { Cursor::new().scan(bucket, size, key)? };
        }
        let _exclusive = bucket.exclusive();
        // another remover may have been faster
        let size = bucket.size.load(Ordering::Acquire);
        let (chunk, slot) = unsafe { Cursor::new().scan(bucket, size, key)? };
        let removed = unsafe { (*chunk).take(slot) };
        unsafe { self.fill_hole(bucket, size, chunk, slot) };
        Some(removed)
    }

    /// Removes `key`, running its key and value destructors. Returns `false`
    /// without side effects if the key is absent.
    pub fn remove(&self, key: &K) -> bool {
        self.remove_entry(key).is_some()
    }

    /// Removes every pair matching `predicate`, returning how many were
    /// removed. Destructors run after each bucket is released.
    pub fn remove_if(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.iter() {
            let mut doomed = Vec::new();
            {
                let _exclusive = bucket.exclusive();
                let mut size = bucket.size.load(Ordering::Acquire);
                let mut index = 0;
                while index < size {
                    unsafe {
                        let (chunk, _, slot) = bucket.locate(index);
                        if predicate((*chunk).key(slot), (*chunk).value(slot)) {
                            doomed.push((*chunk).take(slot));
                            self.fill_hole(bucket, size, chunk, slot);
                            size -= 1;
                        } else {
                            index += 1;
                        }
                    }
                }
            }
            removed += doomed.len();
        }
        removed
    }

    /// Moves the last pair of the bucket into the vacated `(hole, slot)`,
    /// releases a chunk left empty, and publishes `size - 1`.
    ///
    /// # Safety
    /// Caller holds the bucket exclusively and `(hole, slot)` was just vacated.
    unsafe fn fill_hole(
        &self,
        bucket: &NmBucket<K, V, C>,
        size: u32,
        hole: *mut Chunk<K, V, C>,
        slot: usize,
    ) {
        let last_index = size - 1;
        let (last, prev, last_slot) = bucket.locate(last_index);
        if last != hole || last_slot != slot {
            let (key, value) = (*last).take(last_slot);
            (*hole).write(slot, key, value);
        }
        if last_slot == 0 {
            if prev.is_null() {
                bucket.head.store(ptr::null_mut(), Ordering::Release);
            } else {
                (*prev).next.store(ptr::null_mut(), Ordering::Release);
            }
            self.free_chunks.lock().push(Box::from_raw(last));
        }
        bucket.size.store(last_index, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.size.load(Ordering::Acquire) as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunks currently parked on the free list.
    pub fn free_chunk_count(&self) -> usize {
        self.free_chunks.lock().len()
    }

    /// Visits every pair. Serial only.
    pub fn iterate(&mut self, mut visit: impl FnMut(&K, &V)) {
        for bucket in self.buckets.iter_mut() {
            bucket.inner.for_each(&mut visit);
        }
    }

    /// Drops every pair, releases all chunks and empties the free list.
    /// Serial only.
    pub fn free_all_chunks(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.inner.clear();
        }
        self.free_chunks.get_mut().clear();
    }
}

impl<K, V, S, const C: usize, const N: usize> Drop for NonMonotonicHashTable<K, V, S, C, N> {
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.inner.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Clone)]
    struct Tracked {
        id: u32,
        drops: Arc<AtomicUsize>,
    }
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let table: NonMonotonicHashTable<u32, u32> = NonMonotonicHashTable::new();
        table.get_and_insert(1, |_| 10);
        assert!(!table.remove(&2));
        assert_eq!(table.get(&1), Some(10));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_then_reinsert_constructs_fresh_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let table: NonMonotonicHashTable<u32, Arc<Tracked>, JenkinsState, 2, 4> =
            NonMonotonicHashTable::new();
        let (first, inserted) = table.get_and_insert(5, |k| {
            Arc::new(Tracked { id: *k, drops: drops.clone() })
        });
        assert!(inserted);
        drop(first);
        assert!(table.remove(&5));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(table.get(&5).is_none());
        let (second, inserted) = table.get_and_insert(5, |k| {
            Arc::new(Tracked { id: k + 100, drops: drops.clone() })
        });
        assert!(inserted);
        assert_eq!(second.id, 105);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emptied_chunks_are_recycled() {
        let table: NonMonotonicHashTable<u32, u32, RandomState, 2, 1> =
            NonMonotonicHashTable::with_hasher(RandomState::new());
        for i in 0..6 {
            table.get_and_insert(i, |k| *k);
        }
        assert_eq!(table.free_chunk_count(), 0);
        for i in 0..4 {
            assert!(table.remove(&i));
        }
        assert_eq!(table.free_chunk_count(), 2);
        for i in 10..14 {
            table.get_and_insert(i, |k| *k);
        }
        assert_eq!(table.free_chunk_count(), 0);
        for i in [4, 5, 10, 11, 12, 13] {
            assert_eq!(table.get(&i), Some(i));
        }
    }

    #[test]
    fn swap_with_last_keeps_other_pairs() {
        let table: NonMonotonicHashTable<u32, u32, RandomState, 3, 1> =
            NonMonotonicHashTable::with_hasher(RandomState::new());
        for i in 0..10 {
            table.get_and_insert(i, |k| k * 2);
        }
        assert!(table.remove(&0));
        assert!(table.remove(&4));
        assert!(table.remove(&9));
        for i in 0..10 {
            let expected = if [0, 4, 9].contains(&i) { None } else { Some(i * 2) };
            assert_eq!(table.get(&i), expected, "key {i}");
        }
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn remove_if_drops_matching_pairs() {
        let table: NonMonotonicHashTable<u32, u32, JenkinsState, 3, 8> = NonMonotonicHashTable::new();
        for i in 0..40 {
            table.get_and_insert(i, |k| k % 4);
        }
        assert_eq!(table.remove_if(|_, token| *token == 1), 10);
        assert_eq!(table.len(), 30);
        for i in 0..40 {
            assert_eq!(table.get(&i).is_some(), i % 4 != 1);
        }
    }

    #[test]
    fn free_all_chunks_resets_table() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut table: NonMonotonicHashTable<u32, Tracked, JenkinsState, 2, 2> =
            NonMonotonicHashTable::new();
        for i in 0..9 {
            let value = Tracked { id: i, drops: drops.clone() };
            let (clone, _) = table.get_and_insert(i, move |_| value);
            drop(clone);
        }
        let clones = drops.load(Ordering::SeqCst);
        assert_eq!(clones, 9);
        let mut visited = 0;
        table.iterate(|k, v| {
            assert_eq!(*k, v.id);
            visited += 1;
        });
        assert_eq!(visited, 9);
        table.free_all_chunks();
        assert_eq!(drops.load(Ordering::SeqCst), clones + 9);
        assert!(table.is_empty());
    }
}
