use super::iter::DefinitionIter;
use super::{
    trailing_offset, DedupTables, Definition, DefinitionHeader, DefinitionKey, DefinitionKind,
    GroupDef, Handle, HashFn, HashFold, InterimCommunicatorDef, MetricDef, Payload,
    SamplingSetDef, StringDef,
};
use crate::allocator::{AllocResult, Allocator, MovableMemory, PageInfo, PageManager};
use crate::hashtab::jenkins;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Creation ordered list of one definition type.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionList {
    pub head: MovableMemory,
    pub tail: MovableMemory,
    pub counter: u32,
}

/// Read access to definitions, whether they live in this process's pages or
/// in pages received from another rank.
pub trait DefinitionStore {
    #[doc(hidden)]
    fn resolve_raw(&self, memory: MovableMemory) -> *const u8;

    fn list(&self, kind: DefinitionKind) -> DefinitionList;

    fn get<D: Definition>(&self, handle: Handle<D>) -> &D {
        crate::bug_on!(handle.is_invalid(), "dereferencing an invalid {:?}", handle);
        unsafe { &*(self.resolve_raw(handle.memory()) as *const D) }
    }

    #[doc(hidden)]
    fn trailing<D: Definition>(&self, handle: Handle<D>, len: usize) -> &[u8] {
        crate::bug_on!(handle.is_invalid(), "dereferencing an invalid {:?}", handle);
        unsafe {
            let start = self.resolve_raw(handle.memory()).add(trailing_offset::<D>());
            std::slice::from_raw_parts(start, len)
        }
    }

    fn count<D: Definition>(&self) -> u32 {
        self.list(D::KIND).counter
    }

    /// Definitions of type `D` in creation order.
    fn iter<D: Definition>(&self) -> DefinitionIter<'_, Self, D>
    where
        Self: Sized,
    {
        DefinitionIter::new(self)
    }

    fn string(&self, handle: Handle<StringDef>) -> &str {
        let length = self.get(handle).length as usize;
        match std::str::from_utf8(self.trailing(handle, length)) {
            Ok(s) => s,
            Err(e) => crate::bug!("corrupted string definition {:?}: {}", handle, e),
        }
    }

    fn group_members(&self, handle: Handle<GroupDef>) -> &[u64] {
        let n = self.get(handle).number_of_members as usize;
        let bytes = self.trailing(handle, n * std::mem::size_of::<u64>());
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const u64, n) }
    }

    fn sampling_set_metrics(&self, handle: Handle<SamplingSetDef>) -> &[Handle<MetricDef>] {
        let n = self.get(handle).number_of_metrics as usize;
        let bytes = self.trailing(handle, n * std::mem::size_of::<Handle<MetricDef>>());
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const Handle<MetricDef>, n) }
    }

    /// Copy of the adapter payload stored behind an interim communicator.
    fn interim_communicator_payload<P: Payload>(&self, handle: Handle<InterimCommunicatorDef>) -> P {
        let size = self.get(handle).payload_size as usize;
        crate::bug_on!(
            size != std::mem::size_of::<P>(),
            "payload size mismatch for {:?}: stored {} bytes, requested {}",
            handle,
            size,
            std::mem::size_of::<P>()
        );
        let bytes = self.trailing(handle, size);
        unsafe { ptr::read_unaligned(bytes.as_ptr() as *const P) }
    }
}

struct ManagerInner {
    page_manager: PageManager,
    lists: [DefinitionList; DefinitionKind::COUNT],
}

/// Owner of a set of definitions: the local definitions of one process, or
/// the unified definitions on rank 0.
///
/// Defining is thread safe. Lookups of already defined content go through
/// the lock-free dedup tables; the manager lock only serializes allocation
/// and the bookkeeping of the creation lists.
pub struct DefinitionManager {
    allocator: Arc<Allocator>,
    inner: Mutex<ManagerInner>,
    tables: DedupTables,
    mappings: RwLock<[Option<Vec<u32>>; DefinitionKind::COUNT]>,
    hash_fn: HashFn,
}

impl std::fmt::Debug for DefinitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists();
        let mut s = f.debug_struct("DefinitionManager");
        for kind in DefinitionKind::ALL {
            s.field(&format!("{:?}", kind), &lists[kind.index()].counter);
        }
        s.finish()
    }
}

impl DefinitionManager {
    pub fn new(allocator: Arc<Allocator>) -> DefinitionManager {
        DefinitionManager::with_hash_fn(allocator, jenkins::hash)
    }

    /// A manager folding definition fields with `hash_fn` instead of the
    /// Jenkins hash.
    pub fn with_hash_fn(allocator: Arc<Allocator>, hash_fn: HashFn) -> DefinitionManager {
        DefinitionManager {
            inner: Mutex::new(ManagerInner {
                page_manager: PageManager::new(allocator.clone()),
                lists: Default::default(),
            }),
            allocator,
            tables: DedupTables::default(),
            mappings: RwLock::new(Default::default()),
            hash_fn,
        }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn hash_fn(&self) -> HashFn {
        self.hash_fn
    }

    pub(crate) fn fold(&self) -> HashFold {
        HashFold::new(self.hash_fn)
    }

    /// Stores `definition` (followed by `trailing`) unless a definition with
    /// an equal `key` exists already, in which case the speculative
    /// allocation is rolled back and the existing handle returned.
    ///
    /// Without a key the definition is always appended.
    pub(crate) fn add_definition<D: Definition>(
        &self,
        definition: D,
        trailing: &[u8],
        key: Option<D::Key>,
    ) -> Handle<D> {
        let table = D::table(&self.tables);
        let key = key.map(|content| DefinitionKey {
            hash: definition.header().hash_value(),
            content,
        });
        if let (Some(table), Some(key)) = (table, key.as_ref()) {
            if let Some(existing) = table.get(key) {
                return *existing;
            }
        }

        let mut inner = self.inner.lock();
        let offset = trailing_offset::<D>();
        let memory = match inner.page_manager.alloc_movable(offset + trailing.len()) {
            Ok(memory) => memory,
            Err(e) => crate::bug!("definition memory exhausted ({:?}): {}", D::KIND, e),
        };
        unsafe {
            let dst = self.allocator.address(memory);
            ptr::write(dst as *mut D, definition);
            ptr::copy_nonoverlapping(trailing.as_ptr(), dst.add(offset), trailing.len());
        }
        let handle = Handle::from_memory(memory);

        match (table, key) {
            (Some(table), Some(key)) => {
                let (existing, inserted) = table.get_and_insert(key, |_| {
                    self.link(&mut inner, handle);
                    handle
                });
                let existing = *existing;
                if !inserted {
                    inner.page_manager.rollback_alloc_movable(memory);
                }
                existing
            }
            _ => {
                self.link(&mut inner, handle);
                handle
            }
        }
    }

    /// Assigns the next sequence number and appends to the creation list.
    fn link<D: Definition>(&self, inner: &mut ManagerInner, handle: Handle<D>) {
        let list = &mut inner.lists[D::KIND.index()];
        unsafe {
            let header = self.allocator.address(handle.memory()) as *mut DefinitionHeader;
            (*header).sequence_number = list.counter;
            if list.tail.is_null() {
                list.head = handle.memory();
            } else {
                let tail = self.allocator.address(list.tail) as *const DefinitionHeader;
                (*tail).next.store(handle.raw(), Ordering::Release);
            }
        }
        list.tail = handle.memory();
        list.counter += 1;
    }

    /// Snapshot of the creation lists of all types.
    pub fn lists(&self) -> Vec<DefinitionList> {
        self.inner.lock().lists.to_vec()
    }

    pub fn page_infos(&self) -> Vec<PageInfo> {
        self.inner.lock().page_manager.page_infos()
    }

    /// Used bytes of each page, in [`page_infos`](Self::page_infos) order.
    ///
    /// Must not run concurrently with definers.
    pub fn page_contents(&self) -> Vec<(PageInfo, Vec<u8>)> {
        let inner = self.inner.lock();
        inner
            .page_manager
            .page_infos()
            .into_iter()
            .map(|info| {
                let bytes = inner
                    .page_manager
                    .page_bytes(info.page_id)
                    .map(|b| b.to_vec())
                    .unwrap_or_default();
                (info, bytes)
            })
            .collect()
    }

    pub fn number_of_used_pages(&self) -> usize {
        self.inner.lock().page_manager.number_of_used_pages()
    }

    /// Installs the `sequence_number -> unified sequence_number` table of a
    /// definition type.
    pub fn set_mapping(&self, kind: DefinitionKind, mapping: Vec<u32>) {
        self.mappings.write()[kind.index()] = Some(mapping);
    }

    pub fn mapping_table(&self, kind: DefinitionKind) -> Option<Vec<u32>> {
        self.mappings.read()[kind.index()].clone()
    }

    /// Unified sequence number of a local definition, once mappings exist.
    pub fn mapping<D: Definition>(&self, handle: Handle<D>) -> Option<u32> {
        let sequence_number = self.get(handle).header().sequence_number();
        self.mappings.read()[D::KIND.index()]
            .as_ref()
            .and_then(|mapping| mapping.get(sequence_number as usize).copied())
    }

    /// Handle of the `sequence_number`th definition of type `D`.
    pub fn by_sequence_number<D: Definition>(&self, sequence_number: u32) -> Option<Handle<D>> {
        self.iter::<D>()
            .nth(sequence_number as usize)
            .map(|(handle, _)| handle)
    }
}

impl DefinitionStore for DefinitionManager {
    fn resolve_raw(&self, memory: MovableMemory) -> *const u8 {
        self.allocator.address(memory)
    }

    fn list(&self, kind: DefinitionKind) -> DefinitionList {
        self.inner.lock().lists[kind.index()]
    }
}

/// Definitions of another rank, rebuilt from its pages.
pub struct RemoteDefinitions {
    page_manager: PageManager,
    lists: Vec<DefinitionList>,
}

impl RemoteDefinitions {
    pub fn new(
        allocator: Arc<Allocator>,
        lists: Vec<DefinitionList>,
        pages: impl IntoIterator<Item = (PageInfo, Vec<u8>)>,
    ) -> AllocResult<RemoteDefinitions> {
        crate::bug_on!(
            lists.len() != DefinitionKind::COUNT,
            "received {} definition lists, expected {}",
            lists.len(),
            DefinitionKind::COUNT
        );
        let mut page_manager = PageManager::new_moved(allocator);
        for (info, bytes) in pages {
            crate::bug_on!(
                bytes.len() != info.usage as usize,
                "page {} announced {} bytes but carried {}",
                info.page_id,
                info.usage,
                bytes.len()
            );
            page_manager
                .alloc_moved_page(info.page_id, info.usage)?
                .copy_from_slice(&bytes);
        }
        Ok(RemoteDefinitions {
            page_manager,
            lists,
        })
    }
}

impl DefinitionStore for RemoteDefinitions {
    fn resolve_raw(&self, memory: MovableMemory) -> *const u8 {
        self.page_manager.resolve(memory)
    }

    fn list(&self, kind: DefinitionKind) -> DefinitionList {
        self.lists[kind.index()]
    }
}
