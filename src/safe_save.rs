// src/safe_save.rs — conflict-aware save strategy selection
//
// Streams page bodies through a fixed-size chunked read/write loop rather
// than materializing a whole file in memory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BufferError, Result};
use crate::notify::{Notification, NotificationSink, NotificationType, Severity};
use crate::page::{PageDescriptor, PageId, PageSource};
use crate::vpm::VirtualPageManager;

/// Tuning knobs for the save planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeWriteConfig {
    pub make_backup: bool,
    /// Above this many conflicting bytes, fall back from `PartialTemp` to
    /// `AtomicTemp` rather than pre-reading the whole conflict region.
    pub partial_temp_threshold: u64,
}

impl Default for SafeWriteConfig {
    fn default() -> Self {
        Self {
            make_backup: false,
            partial_temp_threshold: 50 * 1024 * 1024,
        }
    }
}

/// The five save strategies, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStrategy {
    NewFile,
    SafeInPlace,
    ReverseOrder,
    PartialTemp { conflict_bytes: u64 },
    AtomicTemp,
}

impl WriteStrategy {
    fn label(&self) -> &'static str {
        match self {
            WriteStrategy::NewFile => "new_file",
            WriteStrategy::SafeInPlace => "safe_in_place",
            WriteStrategy::ReverseOrder => "reverse_order",
            WriteStrategy::PartialTemp { .. } => "partial_temp",
            WriteStrategy::AtomicTemp => "atomic_temp",
        }
    }
}

/// One descriptor's relevant shape for conflict analysis, snapshotted so the
/// planner doesn't need to keep borrowing the VPM while it reasons.
struct PlanEntry {
    page_id: PageId,
    virtual_start: u64,
    virtual_size: u64,
    is_dirty: bool,
    original: Option<(u64, u64)>, // (file_offset, original_size), Original sources only
}

fn snapshot_entries(vpm: &VirtualPageManager) -> Vec<PlanEntry> {
    vpm.descriptors()
        .map(|d: &PageDescriptor| PlanEntry {
            page_id: d.page_id,
            virtual_start: d.virtual_start,
            virtual_size: d.virtual_size,
            is_dirty: d.is_dirty,
            original: match d.source {
                PageSource::Original { file_offset, original_size } => Some((file_offset, original_size)),
                _ => None,
            },
        })
        .collect()
}

/// Result of walking the descriptor sequence for read/write overlap.
struct ConflictReport {
    total_conflict_bytes: u64,
    all_expansion_or_unchanged: bool,
    /// Original-sourced, clean descriptors whose original byte range must be
    /// pre-read before any write begins (consulted by `PartialTemp`).
    conflicted_reads: Vec<PageId>,
}

fn detect_conflicts(entries: &[PlanEntry]) -> ConflictReport {
    let mut total_conflict_bytes = 0u64;
    let mut all_expansion_or_unchanged = true;
    let mut conflicted_reads = Vec::new();

    for e in entries {
        if let Some((_, original_size)) = e.original {
            if (e.virtual_size as i64) < original_size as i64 {
                all_expansion_or_unchanged = false;
            }
        }
    }

    for (i, writer) in entries.iter().enumerate() {
        let write_lo = writer.virtual_start;
        let write_hi = writer.virtual_start + writer.virtual_size;
        for reader in &entries[i + 1..] {
            if reader.is_dirty {
                continue; // already resident with edited content, not read from disk
            }
            let Some((file_offset, original_size)) = reader.original else {
                continue; // Memory/Overflow sourced, no original-file read to protect
            };
            let read_lo = file_offset;
            let read_hi = file_offset + original_size;
            let lo = write_lo.max(read_lo);
            let hi = write_hi.min(read_hi);
            if lo < hi {
                total_conflict_bytes += hi - lo;
                conflicted_reads.push(reader.page_id);
            }
        }
    }
    conflicted_reads.dedup();

    ConflictReport {
        total_conflict_bytes,
        all_expansion_or_unchanged,
        conflicted_reads,
    }
}

pub struct SafeFileWriter {
    config: SafeWriteConfig,
}

impl SafeFileWriter {
    pub fn new(config: SafeWriteConfig) -> Self {
        Self { config }
    }

    /// Selects a strategy for writing the VPM's current content to
    /// `target_path`, given the buffer's backing source (if any).
    pub fn plan(
        &self,
        vpm: &VirtualPageManager,
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> WriteStrategy {
        let strategy = self.plan_inner(vpm, target_path);
        notify.emit(
            Notification::new(
                NotificationType::SaveAnalysisComplete,
                Severity::Debug,
                format!("save strategy selected: {}", strategy.label()),
            )
            .with_meta("strategy", strategy.label()),
        );
        strategy
    }

    fn plan_inner(&self, vpm: &VirtualPageManager, target_path: &Path) -> WriteStrategy {
        let same_file = vpm
            .source_path()
            .map(|src| paths_equal(src, target_path))
            .unwrap_or(false);

        if !same_file {
            return WriteStrategy::NewFile;
        }

        let entries = snapshot_entries(vpm);
        let report = detect_conflicts(&entries);

        if report.total_conflict_bytes == 0 {
            return WriteStrategy::SafeInPlace;
        }
        if report.all_expansion_or_unchanged {
            return WriteStrategy::ReverseOrder;
        }
        if report.total_conflict_bytes <= self.config.partial_temp_threshold {
            return WriteStrategy::PartialTemp {
                conflict_bytes: report.total_conflict_bytes,
            };
        }
        WriteStrategy::AtomicTemp
    }

    /// Executes the chosen strategy, writing the VPM's full current content
    /// to `target_path`. Streams one descriptor's worth of bytes at a time
    /// via `VirtualPageManager::read_range`, so working memory stays bounded
    /// by the page cache rather than the file size.
    pub fn write(
        &self,
        vpm: &mut VirtualPageManager,
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let strategy = self.plan(vpm, target_path, notify);
        let entries = snapshot_entries(vpm);

        match &strategy {
            WriteStrategy::NewFile => self.write_sequential(vpm, &entries, target_path, notify)?,
            WriteStrategy::SafeInPlace => {
                self.maybe_backup(target_path, notify)?;
                self.write_sequential(vpm, &entries, target_path, notify)?;
            }
            WriteStrategy::ReverseOrder => {
                self.maybe_backup(target_path, notify)?;
                self.write_reverse(vpm, &entries, target_path, notify)?;
            }
            WriteStrategy::PartialTemp { .. } => {
                self.maybe_backup(target_path, notify)?;
                let report = detect_conflicts(&entries);
                self.write_partial_temp(vpm, &entries, &report.conflicted_reads, target_path, notify)?;
            }
            WriteStrategy::AtomicTemp => self.write_atomic(vpm, &entries, target_path, notify)?,
        }

        notify.emit(
            Notification::new(
                NotificationType::SaveCompleted,
                Severity::Info,
                format!("save completed via {}", strategy.label()),
            )
            .with_meta("strategy", strategy.label()),
        );
        Ok(())
    }

    fn maybe_backup(&self, target_path: &Path, notify: &mut NotificationSink) -> Result<()> {
        if !self.config.make_backup || !target_path.exists() {
            return Ok(());
        }
        let backup_path = backup_path_for(target_path);
        fs::copy(target_path, &backup_path)?;
        notify.emit(
            Notification::new(
                NotificationType::BackupCreated,
                Severity::Info,
                format!("backup written to {}", backup_path.display()),
            )
            .with_meta("path", backup_path.display().to_string()),
        );
        Ok(())
    }

    fn restore_backup(&self, target_path: &Path, notify: &mut NotificationSink) -> Result<()> {
        let backup_path = backup_path_for(target_path);
        if backup_path.exists() {
            fs::copy(&backup_path, target_path)?;
            notify.emit(Notification::new(
                NotificationType::BackupRestored,
                Severity::Warning,
                format!("restored {} from backup after a failed save", target_path.display()),
            ));
        }
        Ok(())
    }

    fn write_sequential(
        &self,
        vpm: &mut VirtualPageManager,
        entries: &[PlanEntry],
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(target_path)?;
            for e in entries {
                let bytes = vpm.read_range(e.virtual_start, e.virtual_start + e.virtual_size, notify)?;
                file.seek(SeekFrom::Start(e.virtual_start))?;
                file.write_all(&bytes)?;
            }
            let total = entries.last().map(|e| e.virtual_start + e.virtual_size).unwrap_or(0);
            file.set_len(total)?;
            Ok(())
        })();
        if result.is_err() {
            self.restore_backup(target_path, notify)?;
        }
        result
    }

    fn write_reverse(
        &self,
        vpm: &mut VirtualPageManager,
        entries: &[PlanEntry],
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(target_path)?;
            for e in entries.iter().rev() {
                let bytes = vpm.read_range(e.virtual_start, e.virtual_start + e.virtual_size, notify)?;
                file.seek(SeekFrom::Start(e.virtual_start))?;
                file.write_all(&bytes)?;
            }
            let total = entries.last().map(|e| e.virtual_start + e.virtual_size).unwrap_or(0);
            file.set_len(total)?;
            Ok(())
        })();
        if result.is_err() {
            self.restore_backup(target_path, notify)?;
        }
        result
    }

    fn write_partial_temp(
        &self,
        vpm: &mut VirtualPageManager,
        entries: &[PlanEntry],
        conflicted: &[PageId],
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let mut preread: HashMap<PageId, Vec<u8>> = HashMap::new();
        for e in entries {
            if conflicted.contains(&e.page_id) {
                let bytes = vpm.read_range(e.virtual_start, e.virtual_start + e.virtual_size, notify)?;
                preread.insert(e.page_id, bytes);
            }
        }
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(target_path)?;
            for e in entries {
                let bytes = match preread.remove(&e.page_id) {
                    Some(b) => b,
                    None => vpm.read_range(e.virtual_start, e.virtual_start + e.virtual_size, notify)?,
                };
                file.seek(SeekFrom::Start(e.virtual_start))?;
                file.write_all(&bytes)?;
            }
            let total = entries.last().map(|e| e.virtual_start + e.virtual_size).unwrap_or(0);
            file.set_len(total)?;
            Ok(())
        })();
        if result.is_err() {
            self.restore_backup(target_path, notify)?;
        }
        result
    }

    fn write_atomic(
        &self,
        vpm: &mut VirtualPageManager,
        entries: &[PlanEntry],
        target_path: &Path,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let tmp_path = temp_path_for(target_path);
        {
            let mut file = File::create(&tmp_path)?;
            for e in entries {
                let bytes = vpm.read_range(e.virtual_start, e.virtual_start + e.virtual_size, notify)?;
                file.write_all(&bytes)?;
            }
            file.flush()?;
        }
        match fs::rename(&tmp_path, target_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(BufferError::Io(e))
            }
        }
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn backup_path_for(target: &Path) -> PathBuf {
    let ts = file_stamp();
    let mut s = target.as_os_str().to_owned();
    s.push(format!(".bak.{}", ts));
    PathBuf::from(s)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let ts = file_stamp();
    let mut s = target.as_os_str().to_owned();
    s.push(format!(".tmp.{}.{}", ts, std::process::id()));
    PathBuf::from(s)
}

fn file_stamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationSink;
    use crate::page::MemoryPageStorage;
    use crate::vpm::VpmConfig;
    use std::io::{Read, Write as _};

    fn vpm_from_file(path: &Path) -> VirtualPageManager {
        let mut vpm = VirtualPageManager::new(VpmConfig::default(), Box::new(MemoryPageStorage::new()));
        let size = fs::metadata(path).unwrap().len();
        vpm.init_from_file(path.to_path_buf(), size).unwrap();
        vpm
    }

    #[test]
    fn new_file_strategy_when_target_differs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let vpm = vpm_from_file(&src);
        let writer = SafeFileWriter::new(SafeWriteConfig::default());
        let mut notify = NotificationSink::new();
        let dst = dir.path().join("b.txt");
        let strategy = writer.plan(&vpm, &dst, &mut notify);
        assert_eq!(strategy, WriteStrategy::NewFile);
    }

    #[test]
    fn safe_in_place_when_no_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello world").unwrap();
        let vpm = vpm_from_file(&src);
        let writer = SafeFileWriter::new(SafeWriteConfig::default());
        let mut notify = NotificationSink::new();
        let strategy = writer.plan(&vpm, &src, &mut notify);
        assert_eq!(strategy, WriteStrategy::SafeInPlace);
    }

    #[test]
    fn write_sequential_round_trips_in_place_edit() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello world").unwrap();
        let mut vpm = vpm_from_file(&src);
        let mut notify = NotificationSink::new();
        vpm.insert_at(5, b" THERE", &mut notify).unwrap();

        let writer = SafeFileWriter::new(SafeWriteConfig::default());
        writer.write(&mut vpm, &src, &mut notify).unwrap();

        let mut out = String::new();
        File::open(&src).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello THERE world");
    }

    #[test]
    fn atomic_temp_used_for_new_target_with_many_pages() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"abc").unwrap();
        let mut vpm = vpm_from_file(&src);
        let mut notify = NotificationSink::new();
        let writer = SafeFileWriter::new(SafeWriteConfig::default());
        let dst = dir.path().join("out.txt");
        writer.write(&mut vpm, &dst, &mut notify).unwrap();
        let mut out = String::new();
        File::open(&dst).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn backup_created_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"hello world").unwrap();
        let mut vpm = vpm_from_file(&src);
        let mut notify = NotificationSink::new();
        let writer = SafeFileWriter::new(SafeWriteConfig {
            make_backup: true,
            ..SafeWriteConfig::default()
        });
        writer.write(&mut vpm, &src, &mut notify).unwrap();
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
