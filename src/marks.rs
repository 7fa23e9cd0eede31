// src/marks.rs — named, content-anchored virtual addresses
//
// `global_marks` is the sole source of truth. Per-page shadows
// (`PageInfo::page_marks`) are a rebuild-on-load cache populated by the VPM
// when a page is loaded (via `marks_in_range`), never written back here —
// a cache that could drift from the authoritative map is worse than no
// cache at all.

use std::collections::HashMap;

use crate::error::{BufferError, Result};

/// A snapshot of the marks table at a point in time, used by the undo
/// engine to restore marks on undo/redo/rollback.
pub type MarksSnapshot = HashMap<String, u64>;

#[derive(Debug, Default, Clone)]
pub struct MarksManager {
    global_marks: HashMap<String, u64>,
}

impl MarksManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mark(&mut self, name: &str, addr: u64, total_virtual_size: u64) -> Result<()> {
        if addr > total_virtual_size {
            return Err(BufferError::OutOfBounds {
                pos: addr,
                max: total_virtual_size,
            });
        }
        self.global_marks.insert(name.to_string(), addr);
        Ok(())
    }

    pub fn get_mark(&self, name: &str) -> Option<u64> {
        self.global_marks.get(name).copied()
    }

    pub fn remove_mark(&mut self, name: &str) -> Option<u64> {
        self.global_marks.remove(name)
    }

    pub fn clear_all(&mut self) {
        self.global_marks.clear();
    }

    pub fn len(&self) -> usize {
        self.global_marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global_marks.is_empty()
    }

    /// All marks, sorted by address.
    pub fn all_marks(&self) -> Vec<(String, u64)> {
        let mut v: Vec<_> = self
            .global_marks
            .iter()
            .map(|(n, &a)| (n.clone(), a))
            .collect();
        v.sort_by_key(|(_, a)| *a);
        v
    }

    /// Marks with `lo <= addr < hi`, sorted by address.
    pub fn marks_in_range(&self, lo: u64, hi: u64) -> Vec<(String, u64)> {
        let mut v: Vec<_> = self
            .global_marks
            .iter()
            .filter(|&(_, &a)| a >= lo && a < hi)
            .map(|(n, &a)| (n.clone(), a))
            .collect();
        v.sort_by_key(|(_, a)| *a);
        v
    }

    /// Removes and returns every mark in `[lo, hi)` as `(name, offset_from_lo)`.
    pub fn extract_marks_from_range(&mut self, lo: u64, hi: u64) -> Vec<(String, u64)> {
        let victims: Vec<String> = self
            .global_marks
            .iter()
            .filter(|&(_, &a)| a >= lo && a < hi)
            .map(|(n, _)| n.clone())
            .collect();
        let mut out = Vec::with_capacity(victims.len());
        for name in victims {
            if let Some(addr) = self.global_marks.remove(&name) {
                out.push((name, addr - lo));
            }
        }
        out.sort_by_key(|(_, off)| *off);
        out
    }

    /// Sets each `(name, offset)` pair to `base + offset`.
    pub fn insert_marks_from_relative(&mut self, base: u64, marks: &[(String, u64)]) {
        for (name, offset) in marks {
            self.global_marks.insert(name.clone(), base + offset);
        }
    }

    /// The key invariant-preserving routine, applied after every mutation
    /// that inserts/deletes bytes starting at `start`.
    ///
    /// A mark strictly past `del_end` shifts by the net length change. A
    /// mark inside `[start, del_end]` — including one sitting exactly at
    /// `del_end` — collapses to `start`: it was anchored to content that
    /// just got deleted (or, for a mid-buffer insert, a mark sitting
    /// exactly at the insertion point stays put rather than being pushed
    /// forward, since it's ambiguous whether it belongs to the new bytes or
    /// the old ones, and "don't move it" is the safer default).
    pub fn update_after_modification(&mut self, start: u64, deleted: u64, inserted: u64) {
        let net = inserted as i64 - deleted as i64;
        let del_end = start + deleted;
        for addr in self.global_marks.values_mut() {
            if *addr > del_end {
                *addr = (*addr as i64 + net).max(0) as u64;
            } else if *addr >= start {
                *addr = start;
            }
        }
    }

    /// Special case for an insert at `pos == total_virtual_size` (a pure
    /// append). A mark sitting exactly at the end-of-buffer position moves
    /// to the new end — unlike a mid-buffer insert, where a mark at the
    /// insertion point stays put, a mark at the end of a document means
    /// "keep pointing at the end," so it should follow the append.
    pub fn update_after_append(&mut self, pos: u64, inserted: u64) {
        for addr in self.global_marks.values_mut() {
            if *addr == pos {
                *addr = pos + inserted;
            }
        }
    }

    pub fn snapshot(&self) -> MarksSnapshot {
        self.global_marks.clone()
    }

    /// Clears all marks, then reinserts every `(name, addr)` from `snapshot`
    /// whose `addr` still lies in `[0, total_virtual_size]`.
    pub fn restore(&mut self, snapshot: &MarksSnapshot, total_virtual_size: u64) {
        self.global_marks.clear();
        for (name, &addr) in snapshot {
            if addr <= total_virtual_size {
                self.global_marks.insert(name.clone(), addr);
            }
        }
    }

    /// Persistence export: name -> address, suitable for `serde_json`.
    pub fn all_marks_for_persistence(&self) -> std::collections::BTreeMap<String, u64> {
        self.global_marks.iter().map(|(k, &v)| (k.clone(), v)).collect()
    }

    pub fn set_marks_from_persistence(
        &mut self,
        marks: &std::collections::BTreeMap<String, u64>,
        total_virtual_size: u64,
    ) -> Result<()> {
        for (name, &addr) in marks {
            self.set_mark(name, addr, total_virtual_size)?;
        }
        Ok(())
    }
}
