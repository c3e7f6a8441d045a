use std::hash::{BuildHasher, Hasher};

/// Bob Jenkins' one-at-a-time hash, seeded with `initval`.
///
/// Chaining calls (feeding the previous result back in as `initval`) is how
/// definitions fold their fields into a single `hash_value`.
pub fn hash(data: &[u8], initval: u32) -> u32 {
    let mut hasher = JenkinsHasher::with_seed(initval);
    hasher.write(data);
    hasher.finish_u32()
}

/// Incremental one-at-a-time hasher.
#[derive(Clone, Copy, Debug, Default)]
pub struct JenkinsHasher {
    state: u32,
}

impl JenkinsHasher {
    pub fn with_seed(seed: u32) -> JenkinsHasher {
        JenkinsHasher { state: seed }
    }

    pub fn finish_u32(&self) -> u32 {
        let mut h = self.state;
        h = h.wrapping_add(h << 3);
        h ^= h >> 11;
        h = h.wrapping_add(h << 15);
        h
    }
}

impl Hasher for JenkinsHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut h = self.state;
        for &byte in bytes {
            h = h.wrapping_add(byte as u32);
            h = h.wrapping_add(h << 10);
            h ^= h >> 6;
        }
        self.state = h;
    }

    fn finish(&self) -> u64 {
        self.finish_u32() as u64
    }
}

/// The default `BuildHasher` of the hash tables in this crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JenkinsState;

impl BuildHasher for JenkinsState {
    type Hasher = JenkinsHasher;

    fn build_hasher(&self) -> JenkinsHasher {
        JenkinsHasher::default()
    }
}
