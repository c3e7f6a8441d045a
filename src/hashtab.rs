//! Chunked concurrent hash tables with lock-free readers.
//!
//! Every bucket owns a chain of fixed-size chunks plus a `size` counter. An
//! insert writes the new pair and only then publishes `size + 1` with release
//! ordering, so a reader that loads `size` with acquire ordering may trust
//! every slot below it without taking a lock. Two flavors exist:
//!
//! - [`MonotonicHashTable`]: insert only, e.g. caches that live as long as
//!   the measurement.
//! - [`NonMonotonicHashTable`]: also supports removal, at the price of a
//!   reader count per bucket that removals drain before moving pairs.
mod chunk;
pub mod jenkins;
mod monotonic;
mod non_monotonic;

pub use jenkins::{JenkinsHasher, JenkinsState};
pub use monotonic::MonotonicHashTable;
pub use non_monotonic::NonMonotonicHashTable;

use std::hash::{BuildHasher, Hash};

pub const DEFAULT_PAIRS_PER_CHUNK: usize = 4;
pub const DEFAULT_BUCKETS: usize = 256;

fn bucket_index<K: Hash, S: BuildHasher>(hasher: &S, key: &K, buckets: usize) -> usize {
    (hasher.hash_one(key) as u32 as usize) % buckets
}
