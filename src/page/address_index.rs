// src/page/address_index.rs — sorted descriptor list + O(log n) lookup

use std::collections::HashMap;

use crate::error::{BufferError, Result};
use crate::page::descriptor::{PageDescriptor, PageId, PageSource};

/// Maintains the ordered sequence of page descriptors that make up the
/// logical buffer, plus a `page_id -> index` side table for O(1) lookup by
/// id. Invariants (checked by `check_integrity`):
///   1. sum of `virtual_size` over all descriptors == `total_virtual_size`
///   2. `descriptors[i].virtual_start == sum(descriptors[j].virtual_size for j < i)`
pub struct AddressIndex {
    descriptors: Vec<PageDescriptor>,
    id_to_index: HashMap<PageId, usize>,
    total_virtual_size: u64,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            id_to_index: HashMap::new(),
            total_virtual_size: 0,
        }
    }

    pub fn total_virtual_size(&self) -> u64 {
        self.total_virtual_size
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, index: usize) -> Option<&PageDescriptor> {
        self.descriptors.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PageDescriptor> {
        self.descriptors.get_mut(index)
    }

    /// Binary search for the descriptor index whose range contains `pos`,
    /// or (for `pos == total_virtual_size`) the last descriptor.
    pub fn find_index_at(&self, pos: u64) -> Option<usize> {
        if self.descriptors.is_empty() {
            return None;
        }
        if pos == self.total_virtual_size {
            return Some(self.descriptors.len() - 1);
        }
        let mut lo = 0usize;
        let mut hi = self.descriptors.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let d = &self.descriptors[mid];
            if pos < d.virtual_start {
                hi = mid;
            } else if pos >= d.virtual_end() {
                lo = mid + 1;
            } else {
                return Some(mid);
            }
        }
        None
    }

    pub fn find_by_id(&self, id: PageId) -> Option<usize> {
        self.id_to_index.get(&id).copied()
    }

    fn rebuild_id_map(&mut self) {
        self.id_to_index.clear();
        for (i, d) in self.descriptors.iter().enumerate() {
            self.id_to_index.insert(d.page_id, i);
        }
    }

    fn recompute_starts_from(&mut self, from: usize) {
        let mut cursor = if from == 0 {
            0
        } else {
            self.descriptors[from - 1].virtual_end()
        };
        for d in &mut self.descriptors[from..] {
            d.virtual_start = cursor;
            cursor += d.virtual_size;
        }
        self.total_virtual_size = cursor;
    }

    /// Appends a descriptor at the end. Used only during initialization;
    /// general insertion at arbitrary position uses `split_page`.
    pub fn push_page(&mut self, mut desc: PageDescriptor) {
        desc.virtual_start = self.total_virtual_size;
        self.total_virtual_size += desc.virtual_size;
        self.id_to_index.insert(desc.page_id, self.descriptors.len());
        self.descriptors.push(desc);
    }

    pub fn remove_page(&mut self, id: PageId) -> Option<PageDescriptor> {
        let idx = self.id_to_index.remove(&id)?;
        let removed = self.descriptors.remove(idx);
        self.rebuild_id_map();
        self.recompute_starts_from(idx);
        Some(removed)
    }

    /// Adds `delta` (may be negative) to the `virtual_size` of the page at
    /// `index`, shifting every subsequent descriptor's `virtual_start`.
    pub fn update_page_size(&mut self, index: usize, delta: i64) {
        let d = &mut self.descriptors[index];
        d.virtual_size = (d.virtual_size as i64 + delta).max(0) as u64;
        self.recompute_starts_from(index);
    }

    /// Splits the descriptor at `index` at relative offset `split_offset`:
    /// shrinks it to `split_offset` bytes and inserts a new `Memory`,
    /// dirty descriptor immediately after covering the remainder.
    pub fn split_page(&mut self, index: usize, split_offset: u64) -> usize {
        let new_desc = {
            let original = &mut self.descriptors[index];
            let remainder = original.virtual_size - split_offset;
            original.virtual_size = split_offset;
            PageDescriptor {
                page_id: PageId::new(),
                virtual_start: original.virtual_start + split_offset,
                virtual_size: remainder,
                source: PageSource::Memory,
                is_dirty: true,
                is_loaded: false,
                last_access: original.last_access,
                generation: original.generation + 1,
                parent_id: Some(original.page_id),
                newline_count: None,
                line_info_valid: false,
            }
        };
        let insert_at = index + 1;
        self.descriptors.insert(insert_at, new_desc);
        self.rebuild_id_map();
        self.recompute_starts_from(index);
        insert_at
    }

    /// Returns indices of descriptors whose `[virtual_start, virtual_end)`
    /// intersects `[lo, hi)`, in order.
    pub fn indices_in_range(&self, lo: u64, hi: u64) -> Vec<usize> {
        if lo >= hi {
            return Vec::new();
        }
        self.descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.intersects(lo, hi))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn check_integrity(&self) -> Result<()> {
        if self.id_to_index.len() != self.descriptors.len() {
            return Err(BufferError::Integrity(format!(
                "id map has {} entries but there are {} descriptors",
                self.id_to_index.len(),
                self.descriptors.len()
            )));
        }
        let mut cursor = 0u64;
        for (i, d) in self.descriptors.iter().enumerate() {
            if d.virtual_start != cursor {
                return Err(BufferError::Integrity(format!(
                    "descriptor {} virtual_start {} != expected prefix sum {}",
                    i, d.virtual_start, cursor
                )));
            }
            match self.id_to_index.get(&d.page_id) {
                Some(&idx) if idx == i => {}
                _ => {
                    return Err(BufferError::Integrity(format!(
                        "descriptor {} id map desync",
                        i
                    )))
                }
            }
            cursor += d.virtual_size;
        }
        if cursor != self.total_virtual_size {
            return Err(BufferError::Integrity(format!(
                "total_virtual_size {} != summed size {}",
                self.total_virtual_size, cursor
            )));
        }
        Ok(())
    }
}

impl Default for AddressIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::descriptor::PageSource;

    fn mem_desc(size: u64) -> PageDescriptor {
        PageDescriptor::new(0, size, PageSource::Memory)
    }

    #[test]
    fn push_pages_builds_prefix_sums() {
        let mut idx = AddressIndex::new();
        idx.push_page(mem_desc(10));
        idx.push_page(mem_desc(20));
        idx.push_page(mem_desc(5));
        assert_eq!(idx.total_virtual_size(), 35);
        assert_eq!(idx.get(0).unwrap().virtual_start, 0);
        assert_eq!(idx.get(1).unwrap().virtual_start, 10);
        assert_eq!(idx.get(2).unwrap().virtual_start, 30);
        idx.check_integrity().unwrap();
    }

    #[test]
    fn find_index_at_binary_searches() {
        let mut idx = AddressIndex::new();
        idx.push_page(mem_desc(10));
        idx.push_page(mem_desc(20));
        assert_eq!(idx.find_index_at(0), Some(0));
        assert_eq!(idx.find_index_at(9), Some(0));
        assert_eq!(idx.find_index_at(10), Some(1));
        assert_eq!(idx.find_index_at(29), Some(1));
        // end-of-buffer anchor resolves to the last page
        assert_eq!(idx.find_index_at(30), Some(1));
        assert_eq!(idx.find_index_at(31), None);
    }

    #[test]
    fn update_page_size_shifts_subsequent_starts() {
        let mut idx = AddressIndex::new();
        idx.push_page(mem_desc(10));
        idx.push_page(mem_desc(20));
        idx.update_page_size(0, 5);
        assert_eq!(idx.get(0).unwrap().virtual_size, 15);
        assert_eq!(idx.get(1).unwrap().virtual_start, 15);
        assert_eq!(idx.total_virtual_size(), 35);
    }

    #[test]
    fn remove_page_resums_prefix() {
        let mut idx = AddressIndex::new();
        idx.push_page(mem_desc(10));
        let id2 = {
            let d = mem_desc(20);
            let id = d.page_id;
            idx.push_page(d);
            id
        };
        idx.push_page(mem_desc(5));
        idx.remove_page(id2);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(1).unwrap().virtual_start, 10);
        assert_eq!(idx.total_virtual_size(), 15);
        idx.check_integrity().unwrap();
    }

    #[test]
    fn split_page_creates_memory_tail() {
        let mut idx = AddressIndex::new();
        idx.push_page(mem_desc(100));
        let new_idx = idx.split_page(0, 40);
        assert_eq!(new_idx, 1);
        assert_eq!(idx.get(0).unwrap().virtual_size, 40);
        assert_eq!(idx.get(1).unwrap().virtual_start, 40);
        assert_eq!(idx.get(1).unwrap().virtual_size, 60);
        assert!(matches!(idx.get(1).unwrap().source, PageSource::Memory));
        assert_eq!(idx.get(1).unwrap().parent_id, Some(idx.get(0).unwrap().page_id));
        idx.check_integrity().unwrap();
    }
}
