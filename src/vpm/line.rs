// src/vpm/line.rs — line/column queries over the page sequence
//
// Line queries never force a load: a page whose newline positions were
// never computed (never loaded since the manager was initialized) is not
// paged in just to answer a query. Its contribution is approximated from
// descriptor bounds alone and the result is flagged `is_exact: false`.

use crate::error::{BufferError, Result};

use super::VirtualPageManager;

/// The result of a line lookup. `start`/`end` bound the line's bytes
/// (`end` excludes the terminating `\n`, if any). `is_exact` is false when
/// the answer had to be approximated from an unloaded page's bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub line_number: usize,
    pub start: u64,
    pub end: u64,
    pub is_exact: bool,
}

impl VirtualPageManager {
    /// Total number of lines (1 + total newline count). Pages never loaded
    /// since init contribute zero newlines to this count — an approximation
    /// that trades exactness for never forcing I/O just to count lines.
    pub fn line_count(&mut self) -> usize {
        let mut newlines = 0usize;
        for i in 0..self.index.len() {
            if let Some(n) = self.known_newline_count(i) {
                newlines += n;
            }
        }
        newlines + 1
    }

    /// Returns per-descriptor newline count, computing it (CPU-only, no
    /// I/O) if the page is resident but its lazy index hasn't been built
    /// yet, without forcing a load of an evicted/unloaded page.
    fn known_newline_count(&mut self, idx: usize) -> Option<usize> {
        let (cached, is_loaded, page_id) = {
            let d = self.index.get(idx)?;
            (d.newline_count, d.is_loaded, d.page_id)
        };
        if let Some(n) = cached {
            return Some(n);
        }
        if !is_loaded {
            return None;
        }
        let n = self.cache.get_mut(&page_id).map(|info| info.ensure_newline_index().len())?;
        self.index.get_mut(idx)?.newline_count = Some(n);
        Some(n)
    }

    pub fn line_info(&mut self, line_number: usize) -> Result<LineInfo> {
        if line_number == 0 {
            return Err(BufferError::InvalidState("line numbers are 1-based"));
        }
        let total = self.total_virtual_size();
        if self.index.is_empty() || total == 0 {
            return if line_number == 1 {
                Ok(LineInfo { line_number: 1, start: 0, end: 0, is_exact: true })
            } else {
                Err(BufferError::OutOfBounds { pos: line_number as u64, max: 1 })
            };
        }

        let mut cumulative_newlines = 0usize;
        for i in 0..self.index.len() {
            let (d_start, is_loaded, page_id, d_end) = {
                let d = self.index.get(i).unwrap();
                (d.virtual_start, d.is_loaded, d.page_id, d.virtual_end())
            };
            let line_at_start = cumulative_newlines + 1;
            match self.known_newline_count(i) {
                Some(d_newlines) => {
                    let line_at_end = line_at_start + d_newlines;
                    if line_number >= line_at_start && line_number <= line_at_end {
                        let nth = line_number - line_at_start;
                        let offsets = self.cache.get_mut(&page_id).unwrap().ensure_newline_index().to_vec();
                        let start_rel = if nth == 0 { 0 } else { offsets[nth - 1] as u64 + 1 };
                        let end_rel = if nth < offsets.len() {
                            offsets[nth] as u64
                        } else {
                            self.cache.peek(&page_id).unwrap().len() as u64
                        };
                        return Ok(LineInfo {
                            line_number,
                            start: d_start + start_rel,
                            end: d_start + end_rel,
                            is_exact: true,
                        });
                    }
                    cumulative_newlines += d_newlines;
                }
                None => {
                    let _ = is_loaded;
                    if line_number >= line_at_start {
                        return Ok(LineInfo {
                            line_number,
                            start: d_start,
                            end: d_end,
                            is_exact: false,
                        });
                    }
                }
            }
        }
        Ok(LineInfo {
            line_number,
            start: total,
            end: total,
            is_exact: cumulative_newlines + 1 >= line_number,
        })
    }

    /// Converts a byte offset to a 1-based `(line, column)` pair.
    pub fn byte_to_line_col(&mut self, byte: u64) -> Result<(usize, usize)> {
        let total = self.total_virtual_size();
        if byte > total {
            return Err(BufferError::OutOfBounds { pos: byte, max: total });
        }
        let mut cumulative_newlines = 0usize;
        let page_count = self.index.len();
        for i in 0..page_count {
            let (d_start, d_end) = {
                let d = self.index.get(i).unwrap();
                (d.virtual_start, d.virtual_end())
            };
            if byte >= d_end && i + 1 < page_count {
                if let Some(n) = self.known_newline_count(i) {
                    cumulative_newlines += n;
                }
                continue;
            }
            if byte >= d_start && byte <= d_end {
                match self.known_newline_count(i) {
                    Some(_) => {
                        let page_id = self.index.get(i).unwrap().page_id;
                        let rel = (byte - d_start) as u32;
                        let offsets = self.cache.get_mut(&page_id).unwrap().ensure_newline_index().to_vec();
                        let newlines_before = offsets.iter().filter(|&&o| o < rel).count();
                        let line = cumulative_newlines + newlines_before + 1;
                        let line_start_rel = offsets
                            .iter()
                            .rev()
                            .find(|&&o| o < rel)
                            .map(|&o| o as u64 + 1)
                            .unwrap_or(0);
                        let col = (byte - d_start - line_start_rel) as usize + 1;
                        return Ok((line, col));
                    }
                    None => {
                        let line = cumulative_newlines + 1;
                        let col = (byte - d_start) as usize + 1;
                        return Ok((line, col));
                    }
                }
            }
        }
        Ok((cumulative_newlines + 1, 1))
    }

    /// Converts a 1-based `(line, column)` pair back to a byte offset,
    /// clamped to the line's end if `column` overruns it.
    pub fn line_col_to_byte(&mut self, line: usize, col: usize) -> Result<u64> {
        let info = self.line_info(line)?;
        let byte = info.start + col.saturating_sub(1) as u64;
        Ok(byte.min(info.end))
    }
}
