// src/vpm/mod.rs — Virtual Page Manager
//
// Owns address translation, lazy load/evict, and the page cache. The VPM
// owns the MarksManager as a plain embedded field, rather than the two
// holding back-pointers to each other: marks are addressed in VPM terms, so
// the VPM threads itself through as a parameter wherever the marks manager
// needs buffer-wide context, and nothing holds a reference back up to the
// Buffer facade that owns the VPM.

mod line;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};
use crate::marks::MarksManager;
use crate::notify::{Notification, NotificationSink, NotificationType, Severity};
use crate::page::{AddressIndex, PageDescriptor, PageId, PageInfo, PageSource, PageStorage};

pub use line::LineInfo;

/// Tunable knobs for the page manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpmConfig {
    pub page_size: u64,
    pub max_loaded_pages: usize,
}

impl Default for VpmConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024,
            max_loaded_pages: 100,
        }
    }
}

impl VpmConfig {
    pub fn min_page_size(&self) -> u64 {
        self.page_size / 4
    }

    pub fn max_page_size(&self) -> u64 {
        self.page_size * 2
    }
}

pub struct VirtualPageManager {
    config: VpmConfig,
    index: AddressIndex,
    cache: LruCache<PageId, PageInfo>,
    pub marks: MarksManager,
    storage: Box<dyn PageStorage>,
    source_path: Option<PathBuf>,
    access_counter: u64,
    detached: bool,
    missing_ranges: Vec<(u64, u64)>,
}

impl VirtualPageManager {
    pub fn new(config: VpmConfig, storage: Box<dyn PageStorage>) -> Self {
        Self {
            config,
            index: AddressIndex::new(),
            cache: LruCache::unbounded(),
            marks: MarksManager::new(),
            storage,
            source_path: None,
            access_counter: 0,
            detached: false,
            missing_ranges: Vec::new(),
        }
    }

    pub fn config(&self) -> &VpmConfig {
        &self.config
    }

    pub fn total_virtual_size(&self) -> u64 {
        self.index.total_virtual_size()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn missing_ranges(&self) -> &[(u64, u64)] {
        &self.missing_ranges
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn page_count(&self) -> usize {
        self.index.len()
    }

    pub fn loaded_page_count(&self) -> usize {
        self.cache.len()
    }

    pub fn check_integrity(&self) -> Result<()> {
        self.index.check_integrity()
    }

    /// Iterates descriptors in order, for the safe-save planner.
    pub fn descriptors(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.index.iter()
    }

    /// The largest `file_offset + original_size` across every `Original`
    /// descriptor still referencing the backing file, i.e. how many bytes
    /// the source file must have for every page to remain loadable. Used by
    /// `save_file`'s truncation guard without forcing every page to load
    /// just to check.
    pub fn max_original_extent(&self) -> u64 {
        self.index
            .iter()
            .filter_map(|d| match d.source {
                PageSource::Original { file_offset, original_size } => {
                    Some(file_offset + original_size)
                }
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Re-baselines every descriptor onto the just-written file at `path`:
    /// each page's `Original { file_offset, original_size }` now points at
    /// its own current virtual range, and `is_dirty` clears. Overflow bodies
    /// that are no longer needed (the file now holds their bytes) are
    /// dropped from storage. Called by the facade after a successful save.
    pub fn rebase_after_save(&mut self, path: PathBuf) {
        self.source_path = Some(path);
        for i in 0..self.index.len() {
            let (virtual_start, virtual_size, old_source) = {
                let d = self.index.get(i).unwrap();
                (d.virtual_start, d.virtual_size, d.source.clone())
            };
            if let PageSource::Overflow { storage_key } = old_source {
                let _ = self.storage.delete(storage_key);
            }
            let d = self.index.get_mut(i).unwrap();
            d.source = PageSource::Original {
                file_offset: virtual_start,
                original_size: virtual_size,
            };
            d.is_dirty = false;
        }
    }

    fn push_empty_memory_page(&mut self) {
        let mut desc = PageDescriptor::new(0, 0, PageSource::Memory);
        desc.is_loaded = true;
        let id = desc.page_id;
        self.index.push_page(desc);
        self.cache.put(id, PageInfo::new(Vec::new()));
    }

    /// Replaces the manager's contents with `[0, size)` of `path`, split
    /// into `Original` pages of at most `page_size` bytes each.
    pub fn init_from_file(&mut self, path: impl Into<PathBuf>, size: u64) -> Result<()> {
        self.index = AddressIndex::new();
        self.cache.clear();
        self.marks.clear_all();
        self.detached = false;
        self.missing_ranges.clear();
        self.source_path = Some(path.into());

        if size == 0 {
            self.push_empty_memory_page();
            return Ok(());
        }

        let page_size = self.config.page_size;
        let mut offset = 0u64;
        while offset < size {
            let len = page_size.min(size - offset);
            let desc = PageDescriptor::new(
                0,
                len,
                PageSource::Original {
                    file_offset: offset,
                    original_size: len,
                },
            );
            self.index.push_page(desc);
            offset += len;
        }
        Ok(())
    }

    /// Replaces the manager's contents with `bytes`, split into resident
    /// `Memory` pages, enforcing `max_loaded_pages` afterward.
    pub fn init_from_content(&mut self, bytes: &[u8], notify: &mut NotificationSink) -> Result<()> {
        self.index = AddressIndex::new();
        self.cache.clear();
        self.marks.clear_all();
        self.detached = false;
        self.missing_ranges.clear();
        self.source_path = None;

        if bytes.is_empty() {
            self.push_empty_memory_page();
            return Ok(());
        }

        let page_size = self.config.page_size as usize;
        let mut offset = 0usize;
        while offset < bytes.len() {
            let end = (offset + page_size).min(bytes.len());
            let chunk = bytes[offset..end].to_vec();
            let mut desc = PageDescriptor::new(0, chunk.len() as u64, PageSource::Memory);
            desc.is_loaded = true;
            let id = desc.page_id;
            self.index.push_page(desc);
            self.cache.put(id, PageInfo::new(chunk));
            offset = end;
        }
        self.maybe_evict(notify)?;
        notify.emit(Notification::new(
            NotificationType::BufferContentLoaded,
            Severity::Info,
            format!("loaded {} bytes from memory", bytes.len()),
        ));
        Ok(())
    }

    /// Translates `pos` to `(descriptor index, relative offset)`, ensuring
    /// the containing page is loaded. `pos == total_virtual_size` is a
    /// valid insert-at-end anchor.
    pub fn translate_address(
        &mut self,
        pos: u64,
        notify: &mut NotificationSink,
    ) -> Result<(usize, usize)> {
        if self.index.is_empty() {
            if pos != 0 {
                return Err(BufferError::OutOfBounds { pos, max: 0 });
            }
            self.push_empty_memory_page();
            return Ok((0, 0));
        }
        let total = self.total_virtual_size();
        if pos > total {
            return Err(BufferError::OutOfBounds { pos, max: total });
        }
        let idx = self
            .index
            .find_index_at(pos)
            .expect("pos within [0, total] always resolves once non-empty");
        self.ensure_loaded(idx, notify)?;
        let start = self.index.get(idx).unwrap().virtual_start;
        Ok((idx, (pos - start) as usize))
    }

    fn ensure_loaded(&mut self, idx: usize, notify: &mut NotificationSink) -> Result<()> {
        let page_id = self.index.get(idx).unwrap().page_id;
        if self.cache.contains(&page_id) {
            self.cache.get_mut(&page_id);
            return Ok(());
        }
        let source = self.index.get(idx).unwrap().source.clone();
        let load_result: Result<Vec<u8>> = match source {
            PageSource::Original {
                file_offset,
                original_size,
            } => self.load_original(file_offset, original_size),
            PageSource::Overflow { storage_key } => self.storage.load(storage_key),
            PageSource::Memory => match self.storage.load(page_id) {
                Ok(bytes) => {
                    self.index.get_mut(idx).unwrap().source = PageSource::Overflow {
                        storage_key: page_id,
                    };
                    Ok(bytes)
                }
                Err(e) => Err(e),
            },
        };
        match load_result {
            Ok(bytes) => {
                self.cache.put(page_id, PageInfo::new(bytes));
                self.access_counter += 1;
                let access = self.access_counter;
                let d = self.index.get_mut(idx).unwrap();
                d.is_loaded = true;
                d.last_access = access;
                self.maybe_evict(notify)?;
                Ok(())
            }
            Err(e) => {
                self.handle_load_failure(idx, &e, notify);
                Err(BufferError::Detached("page data unavailable"))
            }
        }
    }

    fn load_original(&self, file_offset: u64, original_size: u64) -> Result<Vec<u8>> {
        let path = self
            .source_path
            .as_ref()
            .ok_or(BufferError::InvalidState("no backing file"))?;
        let mut file = File::open(path)?;
        let current_len = file.metadata()?.len();
        if current_len < file_offset + original_size {
            return Err(BufferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "source file shrank: need {} bytes at offset {}, file is only {} bytes",
                    original_size, file_offset, current_len
                ),
            )));
        }
        file.seek(SeekFrom::Start(file_offset))?;
        let mut buf = vec![0u8; original_size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn handle_load_failure(&mut self, idx: usize, err: &BufferError, notify: &mut NotificationSink) {
        let d = self.index.get(idx).unwrap();
        let range = (d.virtual_start, d.virtual_end());
        self.missing_ranges.push(range);
        self.detached = true;
        notify.emit(
            Notification::new(
                NotificationType::PageDataUnavailable,
                Severity::Error,
                format!("failed to load page: {}", err),
            )
            .with_meta("range_start", range.0)
            .with_meta("range_end", range.1),
        );
        notify.emit(Notification::new(
            NotificationType::BufferDetached,
            Severity::Error,
            "buffer detached: unrecoverable page data",
        ));
    }

    fn maybe_evict(&mut self, notify: &mut NotificationSink) -> Result<()> {
        while self.cache.len() > self.config.max_loaded_pages {
            let lru_id = match self.cache.peek_lru() {
                Some((k, _)) => *k,
                None => break,
            };
            let idx = match self.index.find_by_id(lru_id) {
                Some(i) => i,
                None => {
                    self.cache.pop(&lru_id);
                    continue;
                }
            };
            let is_dirty = self.index.get(idx).unwrap().is_dirty;
            let newline_count = self
                .cache
                .peek(&lru_id)
                .and_then(|info| info.newline_count());
            if is_dirty {
                let body = self.cache.peek(&lru_id).unwrap().data.clone();
                match self.storage.save(lru_id, &body) {
                    Ok(()) => {
                        self.cache.pop(&lru_id);
                        let d = self.index.get_mut(idx).unwrap();
                        d.source = PageSource::Overflow {
                            storage_key: lru_id,
                        };
                        d.is_loaded = false;
                        d.newline_count = newline_count;
                        notify.emit(Notification::new(
                            NotificationType::PageEvicted,
                            Severity::Debug,
                            format!("evicted dirty page {}", lru_id),
                        ));
                    }
                    Err(e) => {
                        notify.emit(Notification::new(
                            NotificationType::StorageError,
                            Severity::Error,
                            format!("failed to evict page {}: {}", lru_id, e),
                        ));
                        break;
                    }
                }
            } else {
                self.cache.pop(&lru_id);
                let d = self.index.get_mut(idx).unwrap();
                d.is_loaded = false;
                d.newline_count = newline_count;
                notify.emit(Notification::new(
                    NotificationType::PageEvicted,
                    Severity::Debug,
                    format!("evicted clean page {}", lru_id),
                ));
            }
        }
        Ok(())
    }

    /// Reads `[lo, hi)`, clamped to the buffer. A page that fails to load
    /// contributes zero bytes to its slice rather than shortening the
    /// result: detachment reports the gap, but the caller still gets a
    /// same-length read instead of a silently truncated one.
    pub fn read_range(&mut self, lo: u64, hi: u64, notify: &mut NotificationSink) -> Result<Vec<u8>> {
        let total = self.total_virtual_size();
        let lo = lo.min(total);
        let hi = hi.max(lo).min(total);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity((hi - lo) as usize);
        for idx in self.index.indices_in_range(lo, hi) {
            let d_start = self.index.get(idx).unwrap().virtual_start;
            let d_end = self.index.get(idx).unwrap().virtual_end();
            let seg_lo = lo.max(d_start);
            let seg_hi = hi.min(d_end);
            let want_len = (seg_hi - seg_lo) as usize;
            match self.ensure_loaded(idx, notify) {
                Ok(()) => {
                    let page_id = self.index.get(idx).unwrap().page_id;
                    let rel_lo = (seg_lo - d_start) as usize;
                    let rel_hi = (seg_hi - d_start) as usize;
                    let info = self.cache.get(&page_id).unwrap();
                    out.extend_from_slice(&info.data[rel_lo..rel_hi]);
                }
                Err(_) => out.extend(std::iter::repeat(0u8).take(want_len)),
            }
        }
        Ok(out)
    }

    pub fn insert_at(&mut self, pos: u64, bytes: &[u8], notify: &mut NotificationSink) -> Result<()> {
        let total_before = self.total_virtual_size();
        if pos > total_before {
            return Err(BufferError::OutOfBounds { pos, max: total_before });
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let is_append = pos == total_before;
        let (idx, rel) = self.translate_address(pos, notify)?;
        let page_id = self.index.get(idx).unwrap().page_id;
        {
            let info = self.cache.get_mut(&page_id).expect("page just loaded");
            info.splice_insert(rel, bytes);
        }
        self.index.update_page_size(idx, bytes.len() as i64);
        {
            let d = self.index.get_mut(idx).unwrap();
            d.is_dirty = true;
            d.invalidate_lines();
        }
        if is_append {
            self.marks.update_after_append(pos, bytes.len() as u64);
        } else {
            self.marks.update_after_modification(pos, 0, bytes.len() as u64);
        }

        let new_size = self.index.get(idx).unwrap().virtual_size;
        if new_size > self.config.max_page_size() {
            self.split_page(idx, notify)?;
        }
        self.merge_scan(notify)?;
        Ok(())
    }

    pub fn delete_range(&mut self, lo: u64, hi: u64, notify: &mut NotificationSink) -> Result<Vec<u8>> {
        let total = self.total_virtual_size();
        let lo = lo.min(total);
        let hi = hi.max(lo).min(total);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let mut indices = self.index.indices_in_range(lo, hi);
        indices.sort_unstable();

        let mut removed_by_pos: Vec<(u64, Vec<u8>)> = Vec::new();
        for &idx in indices.iter().rev() {
            self.ensure_loaded(idx, notify)?;
            let d_start = self.index.get(idx).unwrap().virtual_start;
            let d_end = self.index.get(idx).unwrap().virtual_end();
            let seg_lo = lo.max(d_start);
            let seg_hi = hi.min(d_end);
            let page_id = self.index.get(idx).unwrap().page_id;
            let rel_lo = (seg_lo - d_start) as usize;
            let rel_hi = (seg_hi - d_start) as usize;
            let removed = {
                let info = self.cache.get_mut(&page_id).unwrap();
                info.splice_remove(rel_lo, rel_hi)
            };
            self.index
                .update_page_size(idx, -((seg_hi - seg_lo) as i64));
            {
                let d = self.index.get_mut(idx).unwrap();
                d.is_dirty = true;
                d.invalidate_lines();
            }
            removed_by_pos.push((seg_lo, removed));
        }
        removed_by_pos.sort_by_key(|(pos, _)| *pos);
        let mut result = Vec::with_capacity((hi - lo) as usize);
        for (_, bytes) in removed_by_pos {
            result.extend(bytes);
        }

        self.marks.update_after_modification(lo, hi - lo, 0);
        self.cleanup_empty_pages(notify);
        self.merge_scan(notify)?;
        Ok(result)
    }

    /// A composite delete + insert at the same position. A same-length
    /// overwrite preserves marks inside the overwritten region at their
    /// original absolute address — the bytes under them changed but the
    /// marks didn't move. A length-changing overwrite falls back to plain
    /// delete+insert mark semantics (collapse-then-shift), since there is
    /// no single well-defined address left for a mark that sat inside a
    /// region whose length just changed.
    pub fn overwrite(&mut self, pos: u64, bytes: &[u8], notify: &mut NotificationSink) -> Result<Vec<u8>> {
        let total = self.total_virtual_size();
        if pos > total {
            return Err(BufferError::OutOfBounds { pos, max: total });
        }
        let hi = (pos + bytes.len() as u64).min(total);
        let same_length = hi - pos == bytes.len() as u64;
        let preserved = if same_length {
            self.marks.marks_in_range(pos, hi)
        } else {
            Vec::new()
        };
        let original = self.delete_range(pos, hi, notify)?;
        self.insert_at(pos, bytes, notify)?;
        if same_length {
            let new_total = self.total_virtual_size();
            for (name, addr) in preserved {
                let _ = self.marks.set_mark(&name, addr, new_total);
            }
        }
        Ok(original)
    }

    fn cleanup_empty_pages(&mut self, notify: &mut NotificationSink) {
        let empty_ids: Vec<PageId> = self
            .index
            .iter()
            .filter(|d| d.virtual_size == 0)
            .map(|d| d.page_id)
            .collect();
        let keep_one = empty_ids.len() == self.index.len() && !empty_ids.is_empty();
        for (i, id) in empty_ids.into_iter().enumerate() {
            if keep_one && i == 0 {
                continue;
            }
            self.remove_page_fully(id, notify);
        }
    }

    fn remove_page_fully(&mut self, id: PageId, _notify: &mut NotificationSink) {
        self.cache.pop(&id);
        let _ = self.storage.delete(id);
        self.index.remove_page(id);
    }

    /// Splits a page whose body exceeds `max_page_size` at its midpoint.
    fn split_page(&mut self, idx: usize, notify: &mut NotificationSink) -> Result<()> {
        let page_id = self.index.get(idx).unwrap().page_id;
        let size = self.index.get(idx).unwrap().virtual_size;
        let page_start = self.index.get(idx).unwrap().virtual_start;
        let split_offset = size / 2;

        let relative_marks = self
            .marks
            .extract_marks_from_range(page_start + split_offset, page_start + size);

        let new_idx = self.index.split_page(idx, split_offset);
        let new_id = self.index.get(new_idx).unwrap().page_id;

        let tail_data = {
            let info = self.cache.get_mut(&page_id).expect("page loaded before split");
            let tail = info.data.split_off(split_offset as usize);
            info.invalidate_newlines();
            tail
        };
        self.cache.put(new_id, PageInfo::new(tail_data));
        self.index.get_mut(new_idx).unwrap().is_loaded = true;

        let new_start = self.index.get(new_idx).unwrap().virtual_start;
        self.marks.insert_marks_from_relative(new_start, &relative_marks);

        notify.emit(
            Notification::new(
                NotificationType::PageSplit,
                Severity::Info,
                format!("split page {} at offset {}", page_id, split_offset),
            )
            .with_meta("original_id", page_id.to_string())
            .with_meta("new_id", new_id.to_string()),
        );
        Ok(())
    }

    /// Scans adjacent descriptor pairs and merges at most one undersized
    /// pair per call, to bound how much work a single mutation can trigger.
    fn merge_scan(&mut self, notify: &mut NotificationSink) -> Result<()> {
        let min_size = self.config.min_page_size();
        let max_size = self.config.max_page_size();
        let n = self.index.len();
        for i in 0..n.saturating_sub(1) {
            let a = self.index.get(i).unwrap();
            let b = self.index.get(i + 1).unwrap();
            if a.virtual_size == 0 || b.virtual_size == 0 {
                continue;
            }
            let combined = a.virtual_size + b.virtual_size;
            if (a.virtual_size < min_size || b.virtual_size < min_size) && combined <= max_size {
                self.merge_pair(i, i + 1, notify)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Merges two adjacent, already-contiguous pages. Note this never
    /// touches `marks`: merging doesn't move any byte's virtual address
    /// (the two pages were already contiguous), it only fuses descriptor
    /// bookkeeping.
    fn merge_pair(&mut self, left_idx: usize, right_idx: usize, notify: &mut NotificationSink) -> Result<()> {
        debug_assert_eq!(right_idx, left_idx + 1);
        self.ensure_loaded(left_idx, notify)?;
        self.ensure_loaded(right_idx, notify)?;
        let left_id = self.index.get(left_idx).unwrap().page_id;
        let right_id = self.index.get(right_idx).unwrap().page_id;
        let left_size = self.index.get(left_idx).unwrap().virtual_size;
        let right_size = self.index.get(right_idx).unwrap().virtual_size;

        let (target_id, absorbed_id, absorbed_on_right) = if left_size >= right_size {
            (left_id, right_id, true)
        } else {
            (right_id, left_id, false)
        };

        let absorbed_info = self.cache.pop(&absorbed_id).expect("absorbed page loaded");
        let absorbed_len = absorbed_info.data.len() as i64;
        {
            let target_info = self.cache.get_mut(&target_id).expect("target page loaded");
            if absorbed_on_right {
                target_info.data.extend_from_slice(&absorbed_info.data);
            } else {
                let mut combined = absorbed_info.data;
                combined.extend_from_slice(&target_info.data);
                target_info.data = combined;
            }
            target_info.invalidate_newlines();
        }

        self.remove_page_fully(absorbed_id, notify);
        let target_idx = self.index.find_by_id(target_id).expect("target still present");
        self.index.update_page_size(target_idx, absorbed_len);
        if let Some(d) = self.index.get_mut(target_idx) {
            d.is_dirty = true;
            d.invalidate_lines();
        }

        notify.emit(
            Notification::new(
                NotificationType::PageMerged,
                Severity::Debug,
                format!("merged page {} into {}", absorbed_id, target_id),
            )
            .with_meta("target_id", target_id.to_string())
            .with_meta("absorbed_id", absorbed_id.to_string()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPageStorage;

    fn vpm() -> VirtualPageManager {
        VirtualPageManager::new(VpmConfig::default(), Box::new(MemoryPageStorage::new()))
    }

    fn small_vpm(page_size: u64, max_loaded: usize) -> VirtualPageManager {
        VirtualPageManager::new(
            VpmConfig {
                page_size,
                max_loaded_pages: max_loaded,
            },
            Box::new(MemoryPageStorage::new()),
        )
    }

    #[test]
    fn empty_buffer_insert_and_read() {
        let mut vpm = vpm();
        let mut notify = NotificationSink::new();
        vpm.init_from_content(b"", &mut notify).unwrap();
        assert_eq!(vpm.total_virtual_size(), 0);
        vpm.insert_at(0, b"hi", &mut notify).unwrap();
        assert_eq!(vpm.read_range(0, 2, &mut notify).unwrap(), b"hi");
    }

    #[test]
    fn insert_at_end_appends() {
        let mut vpm = vpm();
        let mut notify = NotificationSink::new();
        vpm.init_from_content(b"abc", &mut notify).unwrap();
        vpm.insert_at(3, b"def", &mut notify).unwrap();
        assert_eq!(vpm.read_range(0, 6, &mut notify).unwrap(), b"abcdef");
    }

    #[test]
    fn delete_range_removes_and_returns_bytes() {
        let mut vpm = vpm();
        let mut notify = NotificationSink::new();
        vpm.init_from_content(b"hello world", &mut notify).unwrap();
        let removed = vpm.delete_range(5, 11, &mut notify).unwrap();
        assert_eq!(removed, b" world");
        assert_eq!(vpm.read_range(0, 5, &mut notify).unwrap(), b"hello");
    }

    #[test]
    fn split_triggers_past_max_page_size() {
        let mut vpm = small_vpm(64, 100);
        let mut notify = NotificationSink::new();
        vpm.init_from_content(&vec![b'a'; 50], &mut notify).unwrap();
        assert_eq!(vpm.page_count(), 1);
        vpm.insert_at(50, &vec![b'b'; 100], &mut notify).unwrap();
        // 150 bytes > max_page_size (128) so a split must have occurred
        assert!(vpm.page_count() >= 2);
        assert_eq!(vpm.total_virtual_size(), 150);
        vpm.check_integrity().unwrap();
    }

    #[test]
    fn merge_triggers_when_undersized() {
        let mut vpm = small_vpm(64, 100);
        let mut notify = NotificationSink::new();
        // two pages of 50 bytes each: min_page_size=16, max_page_size=128
        vpm.init_from_content(&vec![b'a'; 100], &mut notify).unwrap();
        // manually shrink so a merge candidate exists
        vpm.delete_range(10, 95, &mut notify).unwrap();
        vpm.check_integrity().unwrap();
        assert_eq!(vpm.total_virtual_size(), 15);
    }

    #[test]
    fn insert_across_page_boundary_splits_and_preserves_marks() {
        let mut vpm = small_vpm(64, 100);
        let mut notify = NotificationSink::new();
        let content: Vec<u8> = b"A".repeat(50)
            .into_iter()
            .chain(b"B".repeat(50))
            .chain(b"C".repeat(50))
            .chain(b"D".repeat(50))
            .collect();
        vpm.init_from_content(&content, &mut notify).unwrap();
        let total = vpm.total_virtual_size();
        vpm.marks.set_mark("early", 10, total).unwrap();
        vpm.marks.set_mark("split_point", 64, total).unwrap();
        vpm.marks.set_mark("late", 120, total).unwrap();

        vpm.insert_at(70, &vec![b'X'; 100], &mut notify).unwrap();

        assert_eq!(vpm.marks.get_mark("early"), Some(10));
        assert_eq!(vpm.marks.get_mark("split_point"), Some(64));
        assert_eq!(vpm.marks.get_mark("late"), Some(220));
        assert_eq!(vpm.total_virtual_size(), 300);
        vpm.check_integrity().unwrap();
    }

    #[test]
    fn eviction_roundtrips_through_storage() {
        let mut vpm = small_vpm(16, 1);
        let mut notify = NotificationSink::new();
        vpm.init_from_content(&vec![b'a'; 16], &mut notify).unwrap();
        vpm.insert_at(16, &vec![b'b'; 16], &mut notify).unwrap();
        // with max_loaded_pages=1 the first page must have been evicted
        assert!(vpm.loaded_page_count() <= 1 || vpm.page_count() == 1);
        let all = vpm.read_range(0, vpm.total_virtual_size(), &mut notify).unwrap();
        assert_eq!(all.len(), 32);
    }

    #[test]
    fn eviction_failure_keeps_page_loaded() {
        let mut vpm = VirtualPageManager::new(
            VpmConfig {
                page_size: 16,
                max_loaded_pages: 1,
            },
            Box::new(crate::page::storage::FailingPageStorage),
        );
        let mut notify = NotificationSink::new();
        vpm.init_from_content(&vec![b'a'; 16], &mut notify).unwrap();
        vpm.insert_at(16, &vec![b'b'; 16], &mut notify).unwrap();
        // eviction of the dirty page must have failed and aborted, so both
        // pages remain loaded even though max_loaded_pages == 1
        assert!(vpm.loaded_page_count() >= 1);
        vpm.check_integrity().unwrap();
    }

    #[test]
    fn overwrite_same_length_preserves_marks() {
        let mut vpm = vpm();
        let mut notify = NotificationSink::new();
        vpm.init_from_content(b"hello world", &mut notify).unwrap();
        let total = vpm.total_virtual_size();
        vpm.marks.set_mark("mid", 7, total).unwrap();
        let original = vpm.overwrite(6, b"WORLD!", &mut notify).unwrap();
        assert_eq!(original, b"world");
        // "world" is 5 bytes, "WORLD!" is 6: length-changing, mark collapses
        assert_eq!(vpm.marks.get_mark("mid"), Some(6));
    }

    #[test]
    fn overwrite_exact_length_keeps_mark_in_place() {
        let mut vpm = vpm();
        let mut notify = NotificationSink::new();
        vpm.init_from_content(b"hello world", &mut notify).unwrap();
        let total = vpm.total_virtual_size();
        vpm.marks.set_mark("mid", 8, total).unwrap();
        vpm.overwrite(6, b"WORLD", &mut notify).unwrap();
        assert_eq!(vpm.marks.get_mark("mid"), Some(8));
        assert_eq!(vpm.read_range(0, 11, &mut notify).unwrap(), b"hello WORLD");
    }
}
