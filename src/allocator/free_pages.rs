use indexmap::IndexSet;

use std::collections::BTreeMap;

/// Free page ranges, indexed by length and by first page.
///
/// Ranges are coalesced with their neighbours on release so that multi-page
/// requests keep finding contiguous space.
#[derive(Clone, Debug)]
pub(super) struct FreePages {
    lens: BTreeMap<u32, IndexSet<u32>>, //<len,<first page>>
    starts: BTreeMap<u32, u32>,         //<first page,len>
    free: u32,
}

impl FreePages {
    pub(super) fn new(first: u32, len: u32) -> FreePages {
        let mut pages = FreePages {
            lens: BTreeMap::new(),
            starts: BTreeMap::new(),
            free: 0,
        };
        if len > 0 {
            pages.insert(first, len);
            pages.free = len;
        }
        pages
    }

    pub(super) fn free_pages(&self) -> u32 {
        self.free
    }

    fn insert(&mut self, start: u32, len: u32) {
        self.starts.insert(start, len);
        self.lens.entry(len).or_insert_with(IndexSet::new).insert(start);
    }

    fn remove(&mut self, start: u32, len: u32) {
        self.starts.remove(&start);
        let mut now_empty = false;
        if let Some(starts) = self.lens.get_mut(&len) {
            starts.shift_remove(&start);
            now_empty = starts.is_empty();
        }
        if now_empty {
            self.lens.remove(&len);
        }
    }

    /// Takes `len` contiguous pages from the smallest range that fits,
    /// preferring the lowest page id among equally sized ranges.
    pub(super) fn acquire(&mut self, len: u32) -> Option<u32> {
        let (range_len, start) = {
            let (range_len, starts) = self.lens.range(len..).next()?;
            (*range_len, *starts.iter().min()?)
        };
        self.remove(start, range_len);
        if range_len > len {
            self.insert(start + len, range_len - len);
        }
        self.free -= len;
        Some(start)
    }

    pub(super) fn release(&mut self, start: u32, len: u32) {
        let mut merged_start = start;
        let mut merged_len = len;
        let mut absorbed: Vec<(u32, u32)> = vec![];
        if let Some((prev_start, prev_len)) = self.starts.range(..start).next_back() {
            crate::bug_on!(
                prev_start + prev_len > start,
                "page {} released twice",
                start
            );
            if prev_start + prev_len == start {
                merged_start = *prev_start;
                merged_len += prev_len;
                absorbed.push((*prev_start, *prev_len));
            }
        }
        if let Some((next_start, next_len)) = self.starts.range(start..).next() {
            crate::bug_on!(start + len > *next_start, "page {} released twice", start);
            if start + len == *next_start {
                merged_len += next_len;
                absorbed.push((*next_start, *next_len));
            }
        }
        for (s, l) in absorbed {
            self.remove(s, l);
        }
        self.insert(merged_start, merged_len);
        self.free += len;
    }
}
