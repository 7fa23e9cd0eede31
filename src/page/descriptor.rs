// src/page/descriptor.rs — page metadata, always resident
//
// `PageSource` is a tagged enum rather than an optional bag of fields, so a
// page's origin (original file region, overflow spill, or pure in-memory
// edit) can't be represented ambiguously.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique page identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a page's body comes from (or, once evicted, came from last).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSource {
    /// Bytes live in the original backing file at `file_offset`, and were
    /// `original_size` bytes long when the page was created (not
    /// necessarily its current `virtual_size`, once edited).
    Original { file_offset: u64, original_size: u64 },
    /// Bytes live in overflow storage under `storage_key`.
    Overflow { storage_key: PageId },
    /// Bytes live only in the in-memory page cache; never been evicted.
    Memory,
}

/// Metadata for one page. Always resident, regardless of whether the
/// page's body (`PageInfo`) is currently loaded.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    pub page_id: PageId,
    pub virtual_start: u64,
    pub virtual_size: u64,
    pub source: PageSource,
    pub is_dirty: bool,
    pub is_loaded: bool,
    pub last_access: u64,
    pub generation: u64,
    pub parent_id: Option<PageId>,
    pub newline_count: Option<usize>,
    pub line_info_valid: bool,
}

impl PageDescriptor {
    pub fn new(virtual_start: u64, virtual_size: u64, source: PageSource) -> Self {
        let is_dirty = matches!(source, PageSource::Memory);
        Self {
            page_id: PageId::new(),
            virtual_start,
            virtual_size,
            source,
            is_dirty,
            is_loaded: false,
            last_access: 0,
            generation: 0,
            parent_id: None,
            newline_count: None,
            line_info_valid: false,
        }
    }

    pub fn virtual_end(&self) -> u64 {
        self.virtual_start + self.virtual_size
    }

    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.virtual_start && pos < self.virtual_end()
    }

    pub fn intersects(&self, lo: u64, hi: u64) -> bool {
        self.virtual_start < hi && lo < self.virtual_end()
    }

    pub fn invalidate_lines(&mut self) {
        self.line_info_valid = false;
    }
}
