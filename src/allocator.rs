//! Page based memory for definitions.
//!
//! An [`Allocator`] owns one contiguous arena cut into power-of-two pages.
//! [`PageManager`]s take pages from it and bump-allocate inside them,
//! returning [`MovableMemory`] offsets instead of pointers. Offsets stay
//! meaningful when pages are copied to another arena: a moved page manager
//! maps the foreign page ids onto its own pages.
mod free_pages;
use free_pages::FreePages;

use crate::utils::round_up;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Every allocation starts on a cacheline boundary.
pub const ALIGNMENT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    InvalidPageSize(u32),
    TooSmall { total_memory: u32, page_size: u32 },
    OutOfMemory(usize),
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AllocError::InvalidPageSize(size) => write!(f, "invalid page size {}", size),
            AllocError::TooSmall {
                total_memory,
                page_size,
            } => write!(
                f,
                "total memory of {} bytes holds less than two pages of {} bytes",
                total_memory, page_size
            ),
            AllocError::OutOfMemory(size) => {
                write!(f, "not enough memory to allocate {} bytes", size)
            }
        }
    }
}

impl std::error::Error for AllocError {}

pub type AllocResult<T> = Result<T, AllocError>;

/// Offset of an allocation from the start of its arena. Zero is null, page 0
/// of every arena is reserved for that.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct MovableMemory(pub(crate) u32);

impl MovableMemory {
    pub const NULL: MovableMemory = MovableMemory(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn offset(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub page_size: u32,
    pub total_pages: u32,
    pub free_pages: u32,
}

pub struct Allocator {
    base: NonNull<u8>,
    layout: Layout,
    page_shift: u32,
    n_pages: u32,
    free: Mutex<FreePages>,
}

// pages are handed out exclusively to page managers, the arena itself is never resized
unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Allocator {{ page_size: {}, pages: {} }}",
            self.page_size(),
            self.n_pages
        )
    }
}

impl Allocator {
    /// Creates an arena of (at most) `total_memory` bytes. `page_size` is
    /// rounded up to the next power of two of at least [`ALIGNMENT`].
    pub fn new(total_memory: u32, page_size: u32) -> AllocResult<Arc<Allocator>> {
        if page_size == 0 {
            return Err(AllocError::InvalidPageSize(page_size));
        }
        let page_size = page_size
            .max(ALIGNMENT as u32)
            .checked_next_power_of_two()
            .ok_or(AllocError::InvalidPageSize(page_size))?;
        let page_shift = page_size.trailing_zeros();
        let n_pages = total_memory >> page_shift;
        if n_pages < 2 {
            return Err(AllocError::TooSmall {
                total_memory,
                page_size,
            });
        }
        let layout = Layout::from_size_align((n_pages as usize) << page_shift, ALIGNMENT)
            .map_err(|_| AllocError::OutOfMemory(total_memory as usize))?;
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })
            .unwrap_or_else(|| handle_alloc_error(layout));
        tracing::debug!(
            "definition memory: {} pages of {} bytes",
            n_pages,
            page_size
        );
        Ok(Arc::new(Allocator {
            base,
            layout,
            page_shift,
            n_pages,
            free: Mutex::new(FreePages::new(1, n_pages - 1)),
        }))
    }

    pub fn page_size(&self) -> u32 {
        1 << self.page_shift
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            page_size: self.page_size(),
            total_pages: self.n_pages,
            free_pages: self.free.lock().free_pages(),
        }
    }

    fn acquire_pages(&self, order: u32) -> Option<u32> {
        self.free.lock().acquire(order)
    }

    fn release_pages(&self, page_id: u32, order: u32) {
        self.free.lock().release(page_id, order)
    }

    fn page_ptr(&self, page_id: u32) -> *mut u8 {
        crate::bug_on!(
            page_id == 0 || page_id >= self.n_pages,
            "page id {} outside of arena",
            page_id
        );
        unsafe { self.base.as_ptr().add((page_id as usize) << self.page_shift) }
    }

    pub(crate) fn address(&self, memory: MovableMemory) -> *mut u8 {
        crate::bug_on!(
            memory.is_null() || (memory.0 >> self.page_shift) >= self.n_pages,
            "invalid movable memory {:#x}",
            memory.0
        );
        unsafe { self.base.as_ptr().add(memory.0 as usize) }
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// Fill level of one page (or page run) owned by a page manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page_id: u32,
    pub usage: u32,
}

#[derive(Debug, Clone, Copy)]
struct Page {
    id: u32,
    order: u32,
    fill: u32,
}

/// Bump allocator over pages taken from an [`Allocator`].
pub struct PageManager {
    allocator: Arc<Allocator>,
    pages: Vec<Page>,
    moved_page_id_mapping: Option<Vec<u32>>,
    last_allocation: MovableMemory,
}

impl std::fmt::Debug for PageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageManager")
            .field("pages", &self.pages.len())
            .field("moved", &self.moved_page_id_mapping.is_some())
            .finish()
    }
}

impl PageManager {
    pub fn new(allocator: Arc<Allocator>) -> PageManager {
        PageManager {
            allocator,
            pages: Vec::new(),
            moved_page_id_mapping: None,
            last_allocation: MovableMemory::NULL,
        }
    }

    /// A page manager holding copies of another manager's pages. Handles
    /// of the original manager resolve through it.
    pub fn new_moved(allocator: Arc<Allocator>) -> PageManager {
        let n_pages = allocator.n_pages as usize;
        PageManager {
            allocator,
            pages: Vec::new(),
            moved_page_id_mapping: Some(vec![0; n_pages]),
            last_allocation: MovableMemory::NULL,
        }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    fn capacity(&self, page: &Page) -> u32 {
        page.order << self.allocator.page_shift
    }

    fn order_for(&self, size: usize) -> AllocResult<u32> {
        let pages = (size.max(1) + self.allocator.page_size() as usize - 1)
            >> self.allocator.page_shift;
        u32::try_from(pages).map_err(|_| AllocError::OutOfMemory(size))
    }

    pub fn alloc_movable(&mut self, size: usize) -> AllocResult<MovableMemory> {
        crate::bug_on!(
            self.moved_page_id_mapping.is_some(),
            "movable allocation from a moved page manager"
        );
        let size = round_up(size.max(1), ALIGNMENT);
        let needed = u32::try_from(size).map_err(|_| AllocError::OutOfMemory(size))?;
        let shift = self.allocator.page_shift;
        // newest page first: it is the one still being filled
        let index = match self
            .pages
            .iter()
            .rposition(|page| (page.order << shift) - page.fill >= needed)
        {
            Some(index) => index,
            None => {
                let order = self.order_for(size)?;
                let id = self
                    .allocator
                    .acquire_pages(order)
                    .ok_or(AllocError::OutOfMemory(size))?;
                tracing::trace!("acquired {} page(s) starting at {}", order, id);
                self.pages.push(Page { id, order, fill: 0 });
                self.pages.len() - 1
            }
        };
        let page = &mut self.pages[index];
        let memory = MovableMemory((page.id << shift) + page.fill);
        page.fill += needed;
        self.last_allocation = memory;
        Ok(memory)
    }

    /// Takes back the most recent allocation.
    pub fn rollback_alloc_movable(&mut self, memory: MovableMemory) {
        crate::bug_on!(
            memory.is_null() || memory != self.last_allocation,
            "rollback of {:#x} which is not the last allocation {:#x}",
            memory.0,
            self.last_allocation.0
        );
        let shift = self.allocator.page_shift;
        let capacity = |page: &Page| page.order << shift;
        match self.pages.iter_mut().find(|page| {
            let start = page.id << shift;
            memory.0 >= start && memory.0 < start + capacity(page)
        }) {
            Some(page) => page.fill = memory.0 - (page.id << shift),
            None => crate::bug!("rollback of {:#x} outside of owned pages", memory.0),
        }
        self.last_allocation = MovableMemory::NULL;
    }

    /// Address of `memory`. Only valid while this manager holds the page.
    pub fn resolve(&self, memory: MovableMemory) -> *mut u8 {
        match &self.moved_page_id_mapping {
            None => self.allocator.address(memory),
            Some(mapping) => {
                let shift = self.allocator.page_shift;
                let foreign = (memory.0 >> shift) as usize;
                let local = mapping.get(foreign).copied().unwrap_or(0);
                crate::bug_on!(
                    memory.is_null() || local == 0,
                    "movable memory {:#x} is not part of any moved page",
                    memory.0
                );
                let offset = memory.0 & ((1 << shift) - 1);
                unsafe { self.allocator.page_ptr(local).add(offset as usize) }
            }
        }
    }

    /// Allocates local pages for `usage` bytes of a foreign page run that
    /// starts at `moved_page_id` and returns them for filling.
    pub fn alloc_moved_page(&mut self, moved_page_id: u32, usage: u32) -> AllocResult<&mut [u8]> {
        let order = self.order_for(usage as usize)?;
        let n_pages = self.allocator.n_pages;
        let mapping = match self.moved_page_id_mapping.as_mut() {
            Some(mapping) => mapping,
            None => crate::bug!("moved page for a regular page manager"),
        };
        crate::bug_on!(
            moved_page_id == 0 || moved_page_id + order > n_pages,
            "foreign page {} does not fit this arena",
            moved_page_id
        );
        let id = self
            .allocator
            .acquire_pages(order)
            .ok_or(AllocError::OutOfMemory(usage as usize))?;
        for i in 0..order {
            mapping[(moved_page_id + i) as usize] = id + i;
        }
        self.pages.push(Page {
            id,
            order,
            fill: usage,
        });
        let start = self.allocator.page_ptr(id);
        Ok(unsafe { std::slice::from_raw_parts_mut(start, usage as usize) })
    }

    pub fn number_of_used_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn page_infos(&self) -> Vec<PageInfo> {
        self.pages
            .iter()
            .map(|page| PageInfo {
                page_id: page.id,
                usage: page.fill,
            })
            .collect()
    }

    /// The used bytes of the page run starting at `page_id`.
    ///
    /// Callers must make sure nobody allocates from or writes to this
    /// manager while the slice is alive.
    pub fn page_bytes(&self, page_id: u32) -> Option<&[u8]> {
        let page = self.pages.iter().find(|page| page.id == page_id)?;
        debug_assert!(page.fill <= self.capacity(page));
        let start = self.allocator.page_ptr(page.id);
        Some(unsafe { std::slice::from_raw_parts(start, page.fill as usize) })
    }

    /// Returns every page to the allocator.
    pub fn free(&mut self) {
        for page in self.pages.drain(..) {
            self.allocator.release_pages(page.id, page.order);
        }
        if let Some(mapping) = self.moved_page_id_mapping.as_mut() {
            mapping.iter_mut().for_each(|id| *id = 0);
        }
        self.last_allocation = MovableMemory::NULL;
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        self.free();
    }
}
