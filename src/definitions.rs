//! Definitions: the uniquely identified entities of a measurement.
//!
//! Definitions live in page manager memory as `#[repr(C)]` records that start
//! with a [`DefinitionHeader`], optionally followed by variable sized data
//! (string bytes, group members, payloads). They are referenced through
//! [`Handle`]s, never through pointers, so that whole pages can be shipped to
//! another process and read there through a moved page manager.
//!
//! Every type keeps a creation ordered list (linked through the header's
//! `next` field) and, where equal content can be defined twice, a
//! [`MonotonicHashTable`] keyed by the content. Equal content always yields
//! the same handle; content with a colliding hash but different fields does
//! not.
mod communicator;
mod group;
mod handle;
mod iter;
mod location;
mod manager;
mod metric;
mod region;
mod sampling_set;
mod source_file;
mod string;

pub use communicator::{CommunicatorDef, InterimCommunicatorDef, Payload};
pub use group::{GroupDef, GroupType};
pub use handle::Handle;
pub use location::{LocationDef, LocationType};
pub use iter::DefinitionIter;
pub use manager::{DefinitionList, DefinitionManager, DefinitionStore, RemoteDefinitions};
pub use metric::{MetricDef, MetricMode, MetricSource, MetricValueType};
pub use region::{Paradigm, RegionDef, RegionType, INVALID_LINE};
pub use sampling_set::{MetricOccurrence, SamplingSetDef, Scope};
pub use source_file::SourceFileDef;
pub use string::StringDef;

use crate::hashtab::MonotonicHashTable;

use serde::{Deserialize, Serialize};

use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hash function used to fold definition fields: `(bytes, previous) -> next`.
pub type HashFn = fn(&[u8], u32) -> u32;

/// The definition types, in the order they are unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DefinitionKind {
    String,
    SourceFile,
    Location,
    Region,
    Group,
    Metric,
    SamplingSet,
    Communicator,
    InterimCommunicator,
}

impl DefinitionKind {
    pub const COUNT: usize = 9;
    pub const ALL: [DefinitionKind; DefinitionKind::COUNT] = [
        DefinitionKind::String,
        DefinitionKind::SourceFile,
        DefinitionKind::Location,
        DefinitionKind::Region,
        DefinitionKind::Group,
        DefinitionKind::Metric,
        DefinitionKind::SamplingSet,
        DefinitionKind::Communicator,
        DefinitionKind::InterimCommunicator,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fields shared by every definition record.
#[repr(C)]
#[derive(Debug)]
pub struct DefinitionHeader {
    next: AtomicU32,
    unified: AtomicU32,
    hash_value: u32,
    sequence_number: u32,
}

impl DefinitionHeader {
    pub(crate) fn new(hash_value: u32) -> DefinitionHeader {
        DefinitionHeader {
            next: AtomicU32::new(0),
            unified: AtomicU32::new(0),
            hash_value,
            sequence_number: u32::MAX,
        }
    }

    pub fn hash_value(&self) -> u32 {
        self.hash_value
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub(crate) fn next_raw(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }

    /// The unified counterpart, invalid until unification copied this
    /// definition.
    pub fn unified<D>(&self) -> Handle<D> {
        Handle::from_raw(self.unified.load(Ordering::Acquire))
    }

    /// Set once, by unification.
    pub(crate) fn set_unified<D>(&self, unified: Handle<D>) {
        if let Err(previous) = self.unified.compare_exchange(
            Handle::<D>::INVALID.raw(),
            unified.raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            crate::bug!(
                "definition {} already unified as {:#x}",
                self.sequence_number,
                previous
            );
        }
    }
}

/// A definition record type.
///
/// # Safety
/// Implementors are `#[repr(C)]`, start with a [`DefinitionHeader`], hold no
/// pointers (only handles and plain integers or atomics) and need no drop.
pub unsafe trait Definition: Sized + Send + Sync + 'static {
    const KIND: DefinitionKind;

    /// The content that decides equality between two definitions.
    type Key: Hash + Eq + Clone + Send + Sync;

    fn header(&self) -> &DefinitionHeader {
        unsafe { &*(self as *const Self as *const DefinitionHeader) }
    }

    #[doc(hidden)]
    fn table(tables: &DedupTables) -> Option<&DefTable<Self>>;
}

/// Offset of the variable sized data behind a definition record.
pub(crate) const fn trailing_offset<D>() -> usize {
    crate::utils::round_up(std::mem::size_of::<D>(), 8)
}

/// Dedup table key: the folded hash decides the bucket, the content decides
/// equality.
#[derive(Debug, Clone)]
pub struct DefinitionKey<K> {
    hash: u32,
    content: K,
}

impl<K: PartialEq> PartialEq for DefinitionKey<K> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.content == other.content
    }
}

impl<K: Eq> Eq for DefinitionKey<K> {}

impl<K> Hash for DefinitionKey<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash)
    }
}

#[doc(hidden)]
pub type DefTable<D> = MonotonicHashTable<DefinitionKey<<D as Definition>::Key>, Handle<D>>;

#[doc(hidden)]
#[derive(Default)]
pub struct DedupTables {
    string: DefTable<StringDef>,
    source_file: DefTable<SourceFileDef>,
    location: DefTable<LocationDef>,
    region: DefTable<RegionDef>,
    group: DefTable<GroupDef>,
    metric: DefTable<MetricDef>,
    sampling_set: DefTable<SamplingSetDef>,
    communicator: DefTable<CommunicatorDef>,
}

/// Folds definition fields into a `hash_value`.
#[derive(Clone, Copy)]
pub(crate) struct HashFold {
    hash_fn: HashFn,
    value: u32,
}

impl HashFold {
    pub(crate) fn new(hash_fn: HashFn) -> HashFold {
        HashFold { hash_fn, value: 0 }
    }

    pub(crate) fn bytes(mut self, bytes: &[u8]) -> HashFold {
        self.value = (self.hash_fn)(bytes, self.value);
        self
    }

    pub(crate) fn u32(self, value: u32) -> HashFold {
        self.bytes(&value.to_ne_bytes())
    }

    pub(crate) fn u64(self, value: u64) -> HashFold {
        self.bytes(&value.to_ne_bytes())
    }

    /// Folds the referenced definition's own hash, so that equal content
    /// hashes equally no matter which manager the handle belongs to.
    pub(crate) fn handle<S: DefinitionStore + ?Sized, D: Definition>(
        self,
        store: &S,
        handle: Handle<D>,
    ) -> HashFold {
        if handle.is_invalid() {
            self.u32(0)
        } else {
            self.u32(store.get(handle).header().hash_value())
        }
    }

    pub(crate) fn finish(self) -> u32 {
        self.value
    }
}
