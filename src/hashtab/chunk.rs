use parking_lot::Mutex;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Fixed capacity block of key/value slots, linked into a bucket's chain.
///
/// Slots carry no initialization flag: a slot is live iff its index in the
/// bucket is below the bucket's published `size`.
pub(super) struct Chunk<K, V, const C: usize> {
    keys: [UnsafeCell<MaybeUninit<K>>; C],
    values: [UnsafeCell<MaybeUninit<V>>; C],
    pub(super) next: AtomicPtr<Chunk<K, V, C>>,
}

impl<K, V, const C: usize> Chunk<K, V, C> {
    /// Heap allocates an empty chunk. Allocation failure aborts the process.
    pub(super) fn allocate() -> *mut Chunk<K, V, C> {
        Box::into_raw(Chunk::boxed())
    }

    pub(super) fn boxed() -> Box<Chunk<K, V, C>> {
        Box::new(Chunk {
            keys: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            values: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Releases the chunk memory without touching slot contents.
    ///
    /// # Safety
    /// `chunk` came from [`Chunk::allocate`] and is no longer reachable.
    pub(super) unsafe fn release(chunk: *mut Chunk<K, V, C>) {
        drop(Box::from_raw(chunk));
    }

    /// # Safety
    /// `slot` holds a live pair.
    pub(super) unsafe fn key(&self, slot: usize) -> &K {
        (*self.keys[slot].get()).assume_init_ref()
    }

    /// # Safety
    /// `slot` holds a live pair.
    pub(super) unsafe fn value(&self, slot: usize) -> &V {
        (*self.values[slot].get()).assume_init_ref()
    }

    /// # Safety
    /// `slot` is not live and not visible to readers.
    pub(super) unsafe fn write(&self, slot: usize, key: K, value: V) {
        (*self.keys[slot].get()).write(key);
        (*self.values[slot].get()).write(value);
    }

    /// Moves the pair out of `slot`, leaving it logically uninitialized.
    ///
    /// # Safety
    /// `slot` holds a live pair and the caller has exclusive bucket access.
    pub(super) unsafe fn take(&self, slot: usize) -> (K, V) {
        (
            (*self.keys[slot].get()).assume_init_read(),
            (*self.values[slot].get()).assume_init_read(),
        )
    }

    /// # Safety
    /// Same as [`Chunk::take`].
    pub(super) unsafe fn drop_pair(&self, slot: usize) {
        (*self.keys[slot].get()).assume_init_drop();
        (*self.values[slot].get()).assume_init_drop();
    }
}

pub(super) struct Bucket<K, V, const C: usize> {
    pub(super) size: AtomicU32,
    pub(super) insert_lock: Mutex<()>,
    pub(super) head: AtomicPtr<Chunk<K, V, C>>,
}

impl<K, V, const C: usize> Bucket<K, V, C> {
    pub(super) fn new() -> Bucket<K, V, C> {
        Bucket {
            size: AtomicU32::new(0),
            insert_lock: Mutex::new(()),
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Chunk holding entry `index` and its predecessor in the chain.
    ///
    /// # Safety
    /// `index` is below the current size and the chain is not being shrunk.
    pub(super) unsafe fn locate(
        &self,
        index: u32,
    ) -> (*mut Chunk<K, V, C>, *mut Chunk<K, V, C>, usize) {
        let mut prev = ptr::null_mut();
        let mut chunk = self.head.load(Ordering::Acquire);
        for _ in 0..(index as usize / C) {
            prev = chunk;
            chunk = (*chunk).next.load(Ordering::Acquire);
        }
        (chunk, prev, index as usize % C)
    }

    /// Drops every live pair and releases the chain. Requires `&mut` so no
    /// reader can be inside the bucket.
    pub(super) fn clear(&mut self) {
        let size = *self.size.get_mut();
        let mut chunk = *self.head.get_mut();
        let mut index = 0u32;
        while !chunk.is_null() {
            unsafe {
                for slot in 0..C {
                    if index >= size {
                        break;
                    }
                    (*chunk).drop_pair(slot);
                    index += 1;
                }
                let next = (*chunk).next.load(Ordering::Relaxed);
                Chunk::release(chunk);
                chunk = next;
            }
        }
        *self.size.get_mut() = 0;
        *self.head.get_mut() = ptr::null_mut();
    }

    pub(super) fn for_each(&mut self, mut visit: impl FnMut(&K, &V)) {
        let size = *self.size.get_mut();
        let mut chunk = *self.head.get_mut();
        let mut index = 0u32;
        while !chunk.is_null() && index < size {
            unsafe {
                for slot in 0..C {
                    if index >= size {
                        break;
                    }
                    visit((*chunk).key(slot), (*chunk).value(slot));
                    index += 1;
                }
                chunk = (*chunk).next.load(Ordering::Relaxed);
            }
        }
    }
}

/// Scan position inside a bucket chain.
///
/// A cursor only moves forward; re-scanning after a size increase starts
/// where the previous scan stopped.
pub(super) struct Cursor<K, V, const C: usize> {
    index: u32,
    slot: usize,
    chunk: *mut Chunk<K, V, C>,
}

impl<K: Eq, V, const C: usize> Cursor<K, V, C> {
    pub(super) fn new() -> Cursor<K, V, C> {
        Cursor {
            index: 0,
            slot: 0,
            chunk: ptr::null_mut(),
        }
    }

    /// Looks for `key` among the entries in `[self.index, size)`.
    ///
    /// # Safety
    /// `size` was loaded from `bucket.size` with acquire ordering and the
    /// entries below it cannot be moved while the scan runs.
    pub(super) unsafe fn scan(
        &mut self,
        bucket: &Bucket<K, V, C>,
        size: u32,
        key: &K,
    ) -> Option<(*mut Chunk<K, V, C>, usize)> {
        while self.index < size {
            if self.chunk.is_null() {
                self.chunk = bucket.head.load(Ordering::Acquire);
                self.slot = 0;
            } else if self.slot == C {
                self.chunk = (*self.chunk).next.load(Ordering::Acquire);
                self.slot = 0;
            }
            if (*self.chunk).key(self.slot) == key {
                return Some((self.chunk, self.slot));
            }
            self.index += 1;
            self.slot += 1;
        }
        None
    }

    /// Appends a pair right after the last scanned entry and publishes the
    /// new size. `new_chunk` is only called when the chain is full.
    ///
    /// # Safety
    /// The cursor has scanned the whole bucket and the caller holds the
    /// bucket's insert lock.
    pub(super) unsafe fn append(
        &mut self,
        bucket: &Bucket<K, V, C>,
        key: K,
        value: V,
        new_chunk: impl FnOnce() -> *mut Chunk<K, V, C>,
    ) -> (*mut Chunk<K, V, C>, usize) {
        if self.chunk.is_null() {
            let chunk = new_chunk();
            bucket.head.store(chunk, Ordering::Release);
            self.chunk = chunk;
            self.slot = 0;
        } else if self.slot == C {
            let chunk = new_chunk();
            (*self.chunk).next.store(chunk, Ordering::Release);
            self.chunk = chunk;
            self.slot = 0;
        }
        (*self.chunk).write(self.slot, key, value);
        // last write of the insert: readers trust every slot below the new size
        bucket.size.store(self.index + 1, Ordering::Release);
        (self.chunk, self.slot)
    }
}
