// src/buffer.rs — public facade and state machine
//
// Glues the VPM (which owns the MarksManager internally, since mark
// consolidation has to happen atomically with every page split/merge),
// UndoEngine, and SafeFileWriter behind the byte-addressable API a consumer
// actually calls. This module carries the `Clean`/`Modified`/`Detached`
// state machine and `check_file_changes`, mirroring a capsule-runtime-style
// lifecycle bookkeeping pattern (deploy/run/verify tracked against a
// checksum), generalized from one binary to every page of a buffer.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::error::{BufferError, Result};
use crate::notify::{Notification, NotificationHandler, NotificationSink, NotificationType, Severity};
use crate::page::PageStorage;
use crate::safe_save::{SafeFileWriter, SafeWriteConfig};
use crate::undo::{Operation, UndoConfig, UndoEngine};
use crate::vpm::{LineInfo, VirtualPageManager, VpmConfig};

/// Buffer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferState {
    /// Buffer and (if any) backing file are in sync.
    Clean,
    /// Buffer differs from the file it was loaded from, or has no file.
    Modified,
    /// At least one page's data is unrecoverable. `save_file` is rejected.
    Detached,
}

/// Policy for reacting to an externally-modified source file. `Ignore` does
/// nothing beyond the (already-emitted) `file_modified_on_disk`
/// notification; `Warn` is identical at the core level (escalation is an
/// external-consumer concern); `Rebase` accepts the on-disk state as the new
/// baseline for future `check_file_changes` calls; `Detach` forces the
/// buffer into `Detached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStrategy {
    Ignore,
    Warn,
    Rebase,
    Detach,
}

/// Change-strategy table. The most specific match wins: `size_changed`
/// beats `with_edits` beats `no_edits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStrategyConfig {
    pub no_edits: ChangeStrategy,
    pub with_edits: ChangeStrategy,
    pub size_changed: ChangeStrategy,
}

impl Default for ChangeStrategyConfig {
    fn default() -> Self {
        // Least-surprise default: always warn, never silently rebase or
        // detach out from under the caller.
        Self {
            no_edits: ChangeStrategy::Warn,
            with_edits: ChangeStrategy::Warn,
            size_changed: ChangeStrategy::Warn,
        }
    }
}

/// Result of `check_file_changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeReport {
    pub changed: bool,
    pub size_changed: bool,
    pub mtime_changed: bool,
    pub deleted: bool,
    pub new_size: Option<u64>,
}

#[derive(Debug, Clone)]
struct FileMeta {
    path: PathBuf,
    size: u64,
    mtime_ms: i64,
    checksum: String,
}

fn stat_file(path: &Path) -> Result<(u64, i64)> {
    let meta = fs::metadata(path)?;
    let mtime_ms = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime_ms))
}

/// Chunked read through a fixed buffer so checksumming never materializes
/// the whole file in memory.
fn compute_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// The public byte-buffer facade. Generic over `Clock` only so tests can
/// supply a `ManualClock`; callers otherwise use `Buffer::new`, which is
/// `Buffer<SystemClock>`.
pub struct Buffer<C: Clock + Clone = SystemClock> {
    vpm: VirtualPageManager,
    undo: Option<UndoEngine<C>>,
    notify: NotificationSink,
    state: BufferState,
    file_meta: Option<FileMeta>,
    change_strategy: ChangeStrategyConfig,
    save_config: SafeWriteConfig,
    clock: C,
    tx_state_snapshot: Option<BufferState>,
}

impl Buffer<SystemClock> {
    pub fn new(storage: Box<dyn PageStorage>) -> Self {
        Self::with_clock(VpmConfig::default(), storage, SystemClock)
    }

    pub fn with_config(config: VpmConfig, storage: Box<dyn PageStorage>) -> Self {
        Self::with_clock(config, storage, SystemClock)
    }
}

impl<C: Clock + Clone> Buffer<C> {
    pub fn with_clock(config: VpmConfig, storage: Box<dyn PageStorage>, clock: C) -> Self {
        Self {
            vpm: VirtualPageManager::new(config, storage),
            undo: None,
            notify: NotificationSink::new(),
            state: BufferState::Clean,
            file_meta: None,
            change_strategy: ChangeStrategyConfig::default(),
            save_config: SafeWriteConfig::default(),
            clock,
            tx_state_snapshot: None,
        }
    }

    pub fn register_notification_handler(&mut self, handler: Box<dyn NotificationHandler>) {
        self.notify.register(handler);
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.state, BufferState::Detached)
    }

    pub fn total_virtual_size(&self) -> u64 {
        self.vpm.total_virtual_size()
    }

    pub fn check_integrity(&self) -> Result<()> {
        self.vpm.check_integrity()
    }

    pub fn set_change_strategy(&mut self, cfg: ChangeStrategyConfig) {
        self.change_strategy = cfg;
    }

    pub fn set_save_config(&mut self, cfg: SafeWriteConfig) {
        self.save_config = cfg;
    }

    fn sync_detached(&mut self) {
        if self.vpm.is_detached() {
            self.state = BufferState::Detached;
        }
    }

    // ---- loading -------------------------------------------------------

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let (size, mtime_ms) = stat_file(&path)?;
        let checksum = compute_checksum(&path)?;
        self.vpm.init_from_file(path.clone(), size)?;
        if let Some(undo) = &mut self.undo {
            undo.clear();
        }
        self.file_meta = Some(FileMeta { path, size, mtime_ms, checksum });
        self.state = BufferState::Clean;
        self.notify.emit(Notification::new(
            NotificationType::BufferContentLoaded,
            Severity::Info,
            "loaded buffer content from file",
        ));
        Ok(())
    }

    pub fn load_content(&mut self, bytes: &[u8]) -> Result<()> {
        self.vpm.init_from_content(bytes, &mut self.notify)?;
        if let Some(undo) = &mut self.undo {
            undo.clear();
        }
        self.file_meta = None;
        self.state = BufferState::Clean;
        Ok(())
    }

    // ---- byte operations -------------------------------------------------

    pub fn get_bytes(&mut self, lo: u64, hi: u64) -> Result<Vec<u8>> {
        let bytes = self.vpm.read_range(lo, hi, &mut self.notify)?;
        self.sync_detached();
        Ok(bytes)
    }

    pub fn insert_bytes(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        if let Some(undo) = &mut self.undo {
            let op = Operation::Insert {
                pos,
                data: data.to_vec(),
                timestamp_ms: self.clock.now_ms(),
            };
            undo.record(op, &self.vpm);
        }
        self.vpm.insert_at(pos, data, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = BufferState::Modified;
        }
        Ok(())
    }

    pub fn delete_bytes(&mut self, lo: u64, hi: u64) -> Result<Vec<u8>> {
        let preview = self.vpm.read_range(lo, hi, &mut self.notify)?;
        let pos = lo.min(self.vpm.total_virtual_size());
        if let Some(undo) = &mut self.undo {
            let op = Operation::Delete {
                pos,
                data: preview.clone(),
                timestamp_ms: self.clock.now_ms(),
            };
            undo.record(op, &self.vpm);
        }
        let removed = self.vpm.delete_range(lo, hi, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = BufferState::Modified;
        }
        Ok(removed)
    }

    pub fn overwrite_bytes(&mut self, pos: u64, data: &[u8]) -> Result<Vec<u8>> {
        let total = self.vpm.total_virtual_size();
        if pos > total {
            return Err(BufferError::OutOfBounds { pos, max: total });
        }
        let hi = (pos + data.len() as u64).min(total);
        let original = self.vpm.read_range(pos, hi, &mut self.notify)?;
        if let Some(undo) = &mut self.undo {
            let op = Operation::Overwrite {
                pos,
                original: original.clone(),
                new: data.to_vec(),
                timestamp_ms: self.clock.now_ms(),
            };
            undo.record(op, &self.vpm);
        }
        let removed = self.vpm.overwrite(pos, data, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = BufferState::Modified;
        }
        Ok(removed)
    }

    // ---- marks -----------------------------------------------------------

    pub fn set_mark(&mut self, name: &str, addr: u64) -> Result<()> {
        let total = self.vpm.total_virtual_size();
        self.vpm.marks.set_mark(name, addr, total)
    }

    pub fn get_mark(&self, name: &str) -> Option<u64> {
        self.vpm.marks.get_mark(name)
    }

    pub fn remove_mark(&mut self, name: &str) -> Option<u64> {
        self.vpm.marks.remove_mark(name)
    }

    pub fn clear_all_marks(&mut self) {
        self.vpm.marks.clear_all();
    }

    pub fn all_marks(&self) -> Vec<(String, u64)> {
        self.vpm.marks.all_marks()
    }

    pub fn marks_in_range(&self, lo: u64, hi: u64) -> Vec<(String, u64)> {
        self.vpm.marks.marks_in_range(lo, hi)
    }

    pub fn all_marks_for_persistence(&self) -> std::collections::BTreeMap<String, u64> {
        self.vpm.marks.all_marks_for_persistence()
    }

    pub fn set_marks_from_persistence(&mut self, marks: &std::collections::BTreeMap<String, u64>) -> Result<()> {
        let total = self.vpm.total_virtual_size();
        self.vpm.marks.set_marks_from_persistence(marks, total)
    }

    // ---- line info ---------------------------------------------------

    pub fn line_count(&mut self) -> usize {
        self.vpm.line_count()
    }

    pub fn line_info(&mut self, line_number: usize) -> Result<LineInfo> {
        self.vpm.line_info(line_number)
    }

    /// `LineInfo` for every line in `[first, last]` (1-based, inclusive).
    pub fn multiple_lines(&mut self, first: usize, last: usize) -> Result<Vec<LineInfo>> {
        let mut out = Vec::new();
        for n in first..=last {
            out.push(self.vpm.line_info(n)?);
        }
        Ok(out)
    }

    pub fn byte_to_line_col(&mut self, byte: u64) -> Result<(usize, usize)> {
        self.vpm.byte_to_line_col(byte)
    }

    pub fn line_col_to_byte(&mut self, line: usize, col: usize) -> Result<u64> {
        self.vpm.line_col_to_byte(line, col)
    }

    // ---- undo/redo ---------------------------------------------------

    pub fn enable_undo(&mut self, cfg: UndoConfig) {
        self.undo = Some(UndoEngine::with_clock(cfg, self.clock.clone()));
    }

    pub fn disable_undo(&mut self) {
        self.undo = None;
    }

    pub fn can_undo(&self) -> bool {
        self.undo.as_ref().map(|u| u.can_undo()).unwrap_or(false)
    }

    pub fn can_redo(&self) -> bool {
        self.undo.as_ref().map(|u| u.can_redo()).unwrap_or(false)
    }

    pub fn undo(&mut self) -> Result<()> {
        let undo = self
            .undo
            .as_mut()
            .ok_or(BufferError::InvalidState("undo is not enabled"))?;
        undo.undo(&mut self.vpm, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = if self.undo.as_ref().unwrap().can_undo() {
                BufferState::Modified
            } else {
                BufferState::Clean
            };
        }
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        let undo = self
            .undo
            .as_mut()
            .ok_or(BufferError::InvalidState("undo is not enabled"))?;
        undo.redo(&mut self.vpm, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = BufferState::Modified;
        }
        Ok(())
    }

    pub fn begin_transaction(&mut self, name: impl Into<String>) -> Result<()> {
        let undo = self
            .undo
            .as_mut()
            .ok_or(BufferError::InvalidState("undo is not enabled"))?;
        undo.begin_transaction(name, &mut self.vpm)?;
        self.tx_state_snapshot = Some(self.state);
        Ok(())
    }

    pub fn commit_transaction(&mut self, name_override: Option<String>) -> Result<()> {
        let undo = self
            .undo
            .as_mut()
            .ok_or(BufferError::InvalidState("undo is not enabled"))?;
        undo.commit_transaction(name_override)?;
        self.tx_state_snapshot = None;
        self.sync_detached();
        if !self.is_detached() {
            self.state = BufferState::Modified;
        }
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        let undo = self
            .undo
            .as_mut()
            .ok_or(BufferError::InvalidState("undo is not enabled"))?;
        undo.rollback_transaction(&mut self.vpm, &mut self.notify)?;
        self.sync_detached();
        if !self.is_detached() {
            self.state = self.tx_state_snapshot.take().unwrap_or(BufferState::Clean);
        } else {
            self.tx_state_snapshot = None;
        }
        Ok(())
    }

    // ---- file-change detection -----------------------------------------

    pub fn check_file_changes(&mut self) -> Result<FileChangeReport> {
        let Some(meta) = self.file_meta.clone() else {
            return Ok(FileChangeReport::default());
        };
        let report = match fs::metadata(&meta.path) {
            Err(_) => FileChangeReport {
                changed: true,
                size_changed: false,
                mtime_changed: false,
                deleted: true,
                new_size: None,
            },
            Ok(stat) => {
                let new_size = stat.len();
                let mtime_ms = stat
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                let size_changed = new_size != meta.size;
                let mtime_changed = mtime_ms != meta.mtime_ms;
                let content_changed = !size_changed
                    && mtime_changed
                    && compute_checksum(&meta.path)
                        .map(|c| c != meta.checksum)
                        .unwrap_or(true);
                FileChangeReport {
                    changed: size_changed || mtime_changed || content_changed,
                    size_changed,
                    mtime_changed,
                    deleted: false,
                    new_size: Some(new_size),
                }
            }
        };
        if report.changed {
            self.notify.emit(
                Notification::new(
                    NotificationType::FileModifiedOnDisk,
                    Severity::Warning,
                    "source file changed on disk since load",
                )
                .with_meta("size_changed", report.size_changed)
                .with_meta("mtime_changed", report.mtime_changed)
                .with_meta("deleted", report.deleted),
            );
            self.apply_change_strategy(&report);
        }
        Ok(report)
    }

    fn apply_change_strategy(&mut self, report: &FileChangeReport) {
        let strategy = if report.size_changed {
            self.change_strategy.size_changed
        } else if matches!(self.state, BufferState::Modified) {
            self.change_strategy.with_edits
        } else {
            self.change_strategy.no_edits
        };
        match strategy {
            ChangeStrategy::Ignore | ChangeStrategy::Warn => {}
            ChangeStrategy::Rebase => {
                if let Some(meta) = self.file_meta.clone() {
                    if let Ok((size, mtime_ms)) = stat_file(&meta.path) {
                        let checksum = compute_checksum(&meta.path).unwrap_or(meta.checksum);
                        self.file_meta = Some(FileMeta { path: meta.path, size, mtime_ms, checksum });
                    }
                }
            }
            ChangeStrategy::Detach => {
                self.state = BufferState::Detached;
                self.notify.emit(Notification::new(
                    NotificationType::BufferDetached,
                    Severity::Error,
                    "detached: source file changed under the change_strategy's detach policy",
                ));
            }
        }
    }

    // ---- saving ---------------------------------------------------------

    /// Saves to the file the buffer was loaded from. Rejected outright while
    /// `Detached`, and rejected if the source has shrunk below what any
    /// `Original` page still needs — there is no override for `save_file`;
    /// use `save_as` with `force_partial_save` instead.
    pub fn save_file(&mut self) -> Result<()> {
        if self.is_detached() {
            return Err(BufferError::Detached("buffer is detached; use save_as"));
        }
        let target = self
            .file_meta
            .as_ref()
            .ok_or(BufferError::InvalidState("no source file to save to"))?
            .path
            .clone();

        let needed = self.vpm.max_original_extent();
        if needed > 0 {
            let actual = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
            if actual < needed {
                self.notify.emit(Notification::new(
                    NotificationType::PartialDataDetected,
                    Severity::Error,
                    format!(
                        "refusing to save: source file shrank to {} bytes but {} bytes of original data are still referenced",
                        actual, needed
                    ),
                ));
                return Err(BufferError::InvalidState(
                    "refusing to save: source has partial data; use save_as",
                ));
            }
        }
        self.write_to(target, false)
    }

    /// Saves to `path`, which may equal or differ from the source file.
    /// Unlike `save_file`, this always proceeds — a `Detached` buffer's
    /// missing ranges are written back as zero bytes (they already read that
    /// way via `get_bytes`). `force_partial_save` only controls whether the
    /// forced-partial-save diagnostics (`page_skipped`/`detached_page_used`)
    /// are emitted for each missing range.
    pub fn save_as(&mut self, path: impl AsRef<Path>, force_partial_save: bool) -> Result<()> {
        self.write_to(path.as_ref().to_path_buf(), force_partial_save)
    }

    fn write_to(&mut self, target: PathBuf, force_partial_save: bool) -> Result<()> {
        if force_partial_save {
            for &(start, end) in self.vpm.missing_ranges() {
                self.notify.emit(
                    Notification::new(
                        NotificationType::PageSkipped,
                        Severity::Warning,
                        "original bytes for this range are unrecoverable and will not be written",
                    )
                    .with_meta("range_start", start)
                    .with_meta("range_end", end),
                );
                self.notify.emit(
                    Notification::new(
                        NotificationType::DetachedPageUsed,
                        Severity::Warning,
                        "writing zero-filled bytes for an unrecoverable range",
                    )
                    .with_meta("range_start", start)
                    .with_meta("range_end", end),
                );
            }
        }
        let writer = SafeFileWriter::new(self.save_config.clone());
        writer.write(&mut self.vpm, &target, &mut self.notify)?;

        if !self.vpm.is_detached() {
            let (size, mtime_ms) = stat_file(&target)?;
            let checksum = compute_checksum(&target)?;
            self.vpm.rebase_after_save(target.clone());
            self.file_meta = Some(FileMeta { path: target, size, mtime_ms, checksum });
            self.state = BufferState::Clean;
        } else {
            // Detachment persists through a partial save: the write is
            // best-effort, not a recovery of the missing bytes.
            self.state = BufferState::Detached;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::page::MemoryPageStorage;

    fn buffer_with(content: &[u8]) -> Buffer<ManualClock> {
        let mut b = Buffer::with_clock(
            VpmConfig::default(),
            Box::new(MemoryPageStorage::new()),
            ManualClock::new(0),
        );
        b.load_content(content).unwrap();
        b
    }

    #[test]
    fn fused_inserts_undo_in_one_step() {
        let mut b = buffer_with(b"Initial content");
        b.enable_undo(UndoConfig {
            max_undo_levels: 1000,
            merge_time_window_ms: 10_000,
            merge_position_window: 0,
        });
        for (i, byte) in b"Hello".iter().enumerate() {
            b.insert_bytes(i as u64, &[*byte]).unwrap();
        }
        assert_eq!(b.get_bytes(0, b.total_virtual_size()).unwrap(), b"HelloInitial content");
        assert!(b.can_undo());
        b.undo().unwrap();
        assert_eq!(b.get_bytes(0, b.total_virtual_size()).unwrap(), b"Initial content");
        assert!(!b.can_undo());
    }

    #[test]
    fn non_adjacent_inserts_need_two_undos() {
        let mut b = buffer_with(b"Initial content");
        b.enable_undo(UndoConfig {
            max_undo_levels: 1000,
            merge_time_window_ms: 10_000,
            merge_position_window: 0,
        });
        b.insert_bytes(0, b"A").unwrap();
        b.insert_bytes(2, b"B").unwrap();
        assert_eq!(b.get_bytes(0, b.total_virtual_size()).unwrap(), b"AIBnitial content");

        b.undo().unwrap();
        assert_eq!(b.get_bytes(0, b.total_virtual_size()).unwrap(), b"AInitial content");
        b.undo().unwrap();
        assert_eq!(b.get_bytes(0, b.total_virtual_size()).unwrap(), b"Initial content");
    }

    #[test]
    fn marks_shift_and_consolidate() {
        let mut b = buffer_with(b"Hello World\nSecond line\nThird line");
        b.set_mark("before", 5).unwrap();
        b.set_mark("at", 12).unwrap();
        b.set_mark("after", 20).unwrap();
        b.insert_bytes(12, b"INSERTED ").unwrap();
        assert_eq!(b.get_mark("before"), Some(5));
        assert_eq!(b.get_mark("at"), Some(12));
        assert_eq!(b.get_mark("after"), Some(29));

        b.delete_bytes(21, 29).unwrap();
        assert_eq!(b.get_mark("after"), Some(21));
    }

    #[test]
    fn page_split_preserves_marks() {
        let mut b = Buffer::with_clock(
            VpmConfig { page_size: 64, max_loaded_pages: 100 },
            Box::new(MemoryPageStorage::new()),
            ManualClock::new(0),
        );
        let content: Vec<u8> = b"A".repeat(50)
            .into_iter()
            .chain(b"B".repeat(50))
            .chain(b"C".repeat(50))
            .chain(b"D".repeat(50))
            .collect();
        b.load_content(&content).unwrap();
        b.set_mark("early", 10).unwrap();
        b.set_mark("split_point", 64).unwrap();
        b.set_mark("late", 120).unwrap();
        b.insert_bytes(70, &vec![b'X'; 100]).unwrap();

        assert_eq!(b.get_mark("early"), Some(10));
        assert_eq!(b.get_mark("split_point"), Some(64));
        assert_eq!(b.get_mark("late"), Some(220));
        assert_eq!(b.total_virtual_size(), 300);
        b.check_integrity().unwrap();
    }

    #[test]
    fn detachment_on_source_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, b"hello world, this is more than one page").unwrap();

        let mut b = Buffer::with_clock(
            VpmConfig { page_size: 8, max_loaded_pages: 1 },
            Box::new(MemoryPageStorage::new()),
            ManualClock::new(0),
        );
        b.load_file(&path).unwrap();

        fs::write(&path, b"").unwrap();

        let err = b.save_file().unwrap_err();
        assert!(matches!(err, BufferError::InvalidState(_)));

        let new_path = dir.path().join("recovered.txt");
        b.save_as(&new_path, true).unwrap();
        assert!(new_path.exists());
    }

    #[test]
    fn transaction_rollback_restores_marks() {
        let mut b = buffer_with(b"0123456789");
        b.enable_undo(UndoConfig::default());
        b.set_mark("t", 8).unwrap();

        b.begin_transaction("x").unwrap();
        b.insert_bytes(5, b"TEMP ").unwrap();
        b.set_mark("temp", 15).unwrap();
        assert_eq!(b.get_mark("t"), Some(13));

        b.rollback_transaction().unwrap();
        assert_eq!(b.get_mark("t"), Some(8));
        assert_eq!(b.get_mark("temp"), None);
        assert_eq!(b.total_virtual_size(), 10);
        assert_eq!(b.get_bytes(0, 10).unwrap(), b"0123456789");
    }

    #[test]
    fn empty_buffer_boundary_behaviors() {
        let mut b = buffer_with(b"");
        assert_eq!(b.line_count(), 1);
        let info = b.line_info(1).unwrap();
        assert_eq!((info.start, info.end), (0, 0));
        b.insert_bytes(0, b"x").unwrap();
        assert_eq!(b.get_bytes(0, 1).unwrap(), b"x");
    }

    #[test]
    fn check_file_changes_reports_no_change_when_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"content").unwrap();
        let mut b = Buffer::<SystemClock>::new(Box::new(MemoryPageStorage::new()));
        b.load_file(&path).unwrap();
        let report = b.check_file_changes().unwrap();
        assert!(!report.changed);
    }

    #[test]
    fn check_file_changes_detects_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"content").unwrap();
        let mut b = Buffer::<SystemClock>::new(Box::new(MemoryPageStorage::new()));
        b.load_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        let report = b.check_file_changes().unwrap();
        assert!(report.changed);
        assert!(report.deleted);
    }

    #[test]
    fn save_file_round_trips_in_place_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello world").unwrap();
        let mut b = Buffer::<SystemClock>::new(Box::new(MemoryPageStorage::new()));
        b.load_file(&path).unwrap();
        b.insert_bytes(5, b" THERE").unwrap();
        b.save_file().unwrap();
        assert_eq!(b.state(), BufferState::Clean);
        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk, b"hello THERE world");
    }
}
