// src/page/info.rs — page body, resident only while loaded

use std::collections::HashMap;

/// The loaded body of a page: its bytes, a lazily-built newline index, and
/// a shadow of the marks that fall within it (authoritative state lives in
/// `MarksManager::global_marks`; this is a rebuild-on-load cache, never
/// written back).
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub data: Vec<u8>,
    newline_offsets: Option<Vec<u32>>,
    pub page_marks: HashMap<String, u64>,
}

impl PageInfo {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            newline_offsets: None,
            page_marks: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Builds (or rebuilds) the newline index by scanning `data`. Called
    /// lazily on first line query rather than eagerly on load.
    pub fn ensure_newline_index(&mut self) -> &[u32] {
        if self.newline_offsets.is_none() {
            let offsets = self
                .data
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b == b'\n')
                .map(|(i, _)| i as u32)
                .collect();
            self.newline_offsets = Some(offsets);
        }
        self.newline_offsets.as_deref().unwrap()
    }

    pub fn newline_count(&self) -> Option<usize> {
        self.newline_offsets.as_ref().map(|v| v.len())
    }

    pub fn invalidate_newlines(&mut self) {
        self.newline_offsets = None;
    }

    pub fn splice_insert(&mut self, rel: usize, bytes: &[u8]) {
        self.data.splice(rel..rel, bytes.iter().copied());
        self.invalidate_newlines();
    }

    /// Removes `[rel_lo, rel_hi)` and returns the removed bytes.
    pub fn splice_remove(&mut self, rel_lo: usize, rel_hi: usize) -> Vec<u8> {
        let removed = self.data.splice(rel_lo..rel_hi, std::iter::empty()).collect();
        self.invalidate_newlines();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_index_counts_correctly() {
        let mut info = PageInfo::new(b"a\nb\nc".to_vec());
        assert_eq!(info.ensure_newline_index(), &[1, 3]);
        assert_eq!(info.newline_count(), Some(2));
    }

    #[test]
    fn splice_insert_invalidates_newline_cache() {
        let mut info = PageInfo::new(b"ab".to_vec());
        info.ensure_newline_index();
        info.splice_insert(1, b"\n");
        assert_eq!(info.data, b"a\nb");
        assert_eq!(info.newline_count(), None);
        assert_eq!(info.ensure_newline_index(), &[1]);
    }

    #[test]
    fn splice_remove_returns_removed_bytes() {
        let mut info = PageInfo::new(b"hello world".to_vec());
        let removed = info.splice_remove(5, 11);
        assert_eq!(removed, b" world");
        assert_eq!(info.data, b"hello");
    }
}
