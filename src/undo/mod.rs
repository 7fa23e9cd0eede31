// src/undo/mod.rs — undo/redo engine with time+locality merge windows

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{BufferError, Result};
use crate::marks::MarksSnapshot;
use crate::notify::NotificationSink;
use crate::vpm::VirtualPageManager;

/// One atomic edit as recorded for undo purposes. Carries enough data to
/// invert itself without re-reading the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { pos: u64, data: Vec<u8>, timestamp_ms: i64 },
    /// `data` is the bytes that were removed by this delete.
    Delete { pos: u64, data: Vec<u8>, timestamp_ms: i64 },
    Overwrite { pos: u64, original: Vec<u8>, new: Vec<u8>, timestamp_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Delete,
    Overwrite,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Overwrite { .. } => OperationKind::Overwrite,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Operation::Insert { timestamp_ms, .. }
            | Operation::Delete { timestamp_ms, .. }
            | Operation::Overwrite { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// The range this operation affects, in the coordinate space shared by
    /// every operation recorded so far (positions are always given in
    /// "current buffer at time of call" terms, so no projection is needed
    /// between consecutive operations).
    fn affected_range(&self) -> (u64, u64) {
        match self {
            Operation::Insert { pos, data, .. } => (*pos, *pos + data.len() as u64),
            Operation::Delete { pos, .. } => (*pos, *pos),
            Operation::Overwrite { pos, new, .. } => (*pos, *pos + new.len() as u64),
        }
    }

    fn default_name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Delete { .. } => "delete",
            Operation::Overwrite { .. } => "overwrite",
        }
    }
}

fn kinds_compatible(a: OperationKind, b: OperationKind) -> bool {
    use OperationKind::*;
    a == b
        || matches!(
            (a, b),
            (Insert, Delete) | (Delete, Insert) | (Insert, Overwrite) | (Overwrite, Insert) | (Delete, Overwrite) | (Overwrite, Delete)
        )
}

fn logical_distance(first: (u64, u64), second: (u64, u64)) -> u64 {
    let (rs, re) = first;
    let (ss, se) = second;
    if ss <= re && se >= rs {
        0
    } else if ss > re {
        ss - re
    } else {
        rs - se
    }
}

/// A committed (or in-progress-via-transaction) unit of undo history.
#[derive(Debug, Clone)]
pub struct OperationGroup {
    pub name: String,
    pub timestamp_ms: i64,
    pub from_transaction: bool,
    pub marks_snapshot: MarksSnapshot,
    pub line_count_snapshot: usize,
    pub operations: Vec<Operation>,
}

struct Transaction {
    name: String,
    initial_marks: MarksSnapshot,
    initial_line_count: usize,
    operations: Vec<Operation>,
}

/// Tuning knobs for merge behavior and history depth, round-trippable as
/// `serde_json` so a host can persist undo settings across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoConfig {
    pub max_undo_levels: usize,
    pub merge_time_window_ms: i64,
    /// Negative disables the locality check entirely (time window alone
    /// governs merging).
    pub merge_position_window: i64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_undo_levels: 1000,
            merge_time_window_ms: 1000,
            merge_position_window: 10,
        }
    }
}

pub struct UndoEngine<C: Clock = SystemClock> {
    undo_stack: VecDeque<OperationGroup>,
    redo_stack: Vec<OperationGroup>,
    transaction: Option<Transaction>,
    config: UndoConfig,
    clock: C,
}

impl UndoEngine<SystemClock> {
    pub fn new(config: UndoConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> UndoEngine<C> {
    pub fn with_clock(config: UndoConfig, clock: C) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            transaction: None,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn can_undo(&self) -> bool {
        self.transaction.is_some() || !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.transaction.is_none() && !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.transaction = None;
    }

    /// Records `op`, called by the facade immediately before the matching
    /// VPM mutation executes. `vpm` is read-only here (for marks/line-count
    /// snapshots); the mutation itself is the facade's job.
    pub fn record(&mut self, op: Operation, vpm: &VirtualPageManager) {
        if let Some(tx) = self.transaction.as_mut() {
            tx.operations.push(op);
            return;
        }
        self.redo_stack.clear();

        if let Some(top) = self.undo_stack.back_mut() {
            if !top.from_transaction {
                if let Some(last) = top.operations.last() {
                    if self.config_allows_merge(last, &op) {
                        if last.kind() == OperationKind::Insert
                            && op.kind() == OperationKind::Insert
                            && op_begins_at_end(last, &op)
                        {
                            let fused = fuse_inserts(last, &op);
                            *top.operations.last_mut().unwrap() = fused;
                        } else {
                            top.operations.push(op);
                        }
                        return;
                    }
                }
            }
        }

        let name = op.default_name().to_string();
        let timestamp_ms = op.timestamp_ms();
        let group = OperationGroup {
            name,
            timestamp_ms,
            from_transaction: false,
            marks_snapshot: vpm.marks.snapshot(),
            line_count_snapshot: 0,
            operations: vec![op],
        };
        self.undo_stack.push_back(group);
        while self.undo_stack.len() > self.config.max_undo_levels {
            self.undo_stack.pop_front();
        }
    }

    fn config_allows_merge(&self, last: &Operation, op: &Operation) -> bool {
        let dt = (op.timestamp_ms() - last.timestamp_ms()).abs();
        if dt > self.config.merge_time_window_ms {
            return false;
        }
        if self.config.merge_position_window >= 0 {
            let dist = logical_distance(last.affected_range(), op.affected_range());
            if dist > self.config.merge_position_window as u64 {
                return false;
            }
        }
        kinds_compatible(last.kind(), op.kind())
    }

    pub fn begin_transaction(&mut self, name: impl Into<String>, vpm: &mut VirtualPageManager) -> Result<()> {
        if self.transaction.is_some() {
            return Err(BufferError::InvalidState("a transaction is already open"));
        }
        self.transaction = Some(Transaction {
            name: name.into(),
            initial_marks: vpm.marks.snapshot(),
            initial_line_count: vpm.line_count(),
            operations: Vec::new(),
        });
        Ok(())
    }

    pub fn commit_transaction(&mut self, name_override: Option<String>) -> Result<()> {
        let tx = self
            .transaction
            .take()
            .ok_or(BufferError::InvalidState("no open transaction"))?;
        let timestamp_ms = tx.operations.first().map(|op| op.timestamp_ms()).unwrap_or(0);
        let group = OperationGroup {
            name: name_override.unwrap_or(tx.name),
            timestamp_ms,
            from_transaction: true,
            marks_snapshot: tx.initial_marks,
            line_count_snapshot: tx.initial_line_count,
            operations: tx.operations,
        };
        self.undo_stack.push_back(group);
        while self.undo_stack.len() > self.config.max_undo_levels {
            self.undo_stack.pop_front();
        }
        Ok(())
    }

    pub fn rollback_transaction(
        &mut self,
        vpm: &mut VirtualPageManager,
        notify: &mut NotificationSink,
    ) -> Result<()> {
        let tx = self
            .transaction
            .take()
            .ok_or(BufferError::InvalidState("no open transaction"))?;
        for op in tx.operations.iter().rev() {
            invert_apply(op, vpm, notify)?;
        }
        let total = vpm.total_virtual_size();
        vpm.marks.restore(&tx.initial_marks, total);
        Ok(())
    }

    /// `undo()` while a transaction is open maps to rollback: an open
    /// transaction hasn't been committed to history yet, so there's no
    /// group to pop — undoing it means discarding its accumulated
    /// operations instead.
    pub fn undo(&mut self, vpm: &mut VirtualPageManager, notify: &mut NotificationSink) -> Result<()> {
        if self.transaction.is_some() {
            return self.rollback_transaction(vpm, notify);
        }
        let group = self
            .undo_stack
            .pop_back()
            .ok_or(BufferError::InvalidState("nothing to undo"))?;
        for op in group.operations.iter().rev() {
            if let Err(e) = invert_apply(op, vpm, notify) {
                self.undo_stack.push_back(group);
                return Err(e);
            }
        }
        let total = vpm.total_virtual_size();
        vpm.marks.restore(&group.marks_snapshot, total);
        self.redo_stack.push(group);
        Ok(())
    }

    pub fn redo(&mut self, vpm: &mut VirtualPageManager, notify: &mut NotificationSink) -> Result<()> {
        if self.transaction.is_some() {
            return Err(BufferError::InvalidState("cannot redo while a transaction is open"));
        }
        let mut group = self
            .redo_stack
            .pop()
            .ok_or(BufferError::InvalidState("nothing to redo"))?;
        // Snapshot current marks before reapplying, so a later undo restores
        // this (pre-redo) state rather than the group's original snapshot.
        group.marks_snapshot = vpm.marks.snapshot();
        for op in group.operations.iter() {
            if let Err(e) = forward_apply(op, vpm, notify) {
                self.redo_stack.push(group);
                return Err(e);
            }
        }
        self.undo_stack.push_back(group);
        Ok(())
    }
}

fn op_begins_at_end(first: &Operation, second: &Operation) -> bool {
    let (_, first_end) = first.affected_range();
    match second {
        Operation::Insert { pos, .. } => *pos == first_end,
        _ => false,
    }
}

fn fuse_inserts(first: &Operation, second: &Operation) -> Operation {
    match (first, second) {
        (
            Operation::Insert { pos, data: d1, .. },
            Operation::Insert { data: d2, timestamp_ms, .. },
        ) => {
            let mut data = d1.clone();
            data.extend_from_slice(d2);
            Operation::Insert {
                pos: *pos,
                data,
                timestamp_ms: *timestamp_ms,
            }
        }
        _ => unreachable!("fuse_inserts called on non-Insert operations"),
    }
}

fn invert_apply(op: &Operation, vpm: &mut VirtualPageManager, notify: &mut NotificationSink) -> Result<()> {
    match op {
        Operation::Insert { pos, data, .. } => {
            vpm.delete_range(*pos, pos + data.len() as u64, notify)?;
        }
        Operation::Delete { pos, data, .. } => {
            vpm.insert_at(*pos, data, notify)?;
        }
        Operation::Overwrite { pos, original, new, .. } => {
            vpm.delete_range(*pos, pos + new.len() as u64, notify)?;
            vpm.insert_at(*pos, original, notify)?;
        }
    }
    Ok(())
}

fn forward_apply(op: &Operation, vpm: &mut VirtualPageManager, notify: &mut NotificationSink) -> Result<()> {
    match op {
        Operation::Insert { pos, data, .. } => {
            vpm.insert_at(*pos, data, notify)?;
        }
        Operation::Delete { pos, data, .. } => {
            vpm.delete_range(*pos, pos + data.len() as u64, notify)?;
        }
        Operation::Overwrite { pos, original, new, .. } => {
            vpm.delete_range(*pos, pos + original.len() as u64, notify)?;
            vpm.insert_at(*pos, new, notify)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::page::MemoryPageStorage;
    use crate::vpm::VpmConfig;

    fn vpm_with(content: &[u8]) -> VirtualPageManager {
        let mut v = VirtualPageManager::new(VpmConfig::default(), Box::new(MemoryPageStorage::new()));
        let mut notify = NotificationSink::new();
        v.init_from_content(content, &mut notify).unwrap();
        v
    }

    fn do_insert(
        engine: &mut UndoEngine<ManualClock>,
        vpm: &mut VirtualPageManager,
        notify: &mut NotificationSink,
        pos: u64,
        bytes: &[u8],
    ) {
        let op = Operation::Insert {
            pos,
            data: bytes.to_vec(),
            timestamp_ms: engine.now_ms(),
        };
        engine.record(op, vpm);
        vpm.insert_at(pos, bytes, notify).unwrap();
    }

    #[test]
    fn adjacent_inserts_within_window_fuse() {
        let clock = ManualClock::new(0);
        let mut engine = UndoEngine::with_clock(UndoConfig::default(), clock.clone());
        let mut vpm = vpm_with(b"");
        let mut notify = NotificationSink::new();

        do_insert(&mut engine, &mut vpm, &mut notify, 0, b"a");
        clock.advance(10);
        do_insert(&mut engine, &mut vpm, &mut notify, 1, b"b");

        assert_eq!(vpm.read_range(0, 2, &mut notify).unwrap(), b"ab");
        engine.undo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.total_virtual_size(), 0);
    }

    #[test]
    fn inserts_far_apart_in_time_do_not_merge() {
        let clock = ManualClock::new(0);
        let mut engine = UndoEngine::with_clock(UndoConfig::default(), clock.clone());
        let mut vpm = vpm_with(b"");
        let mut notify = NotificationSink::new();

        do_insert(&mut engine, &mut vpm, &mut notify, 0, b"a");
        clock.advance(5000);
        do_insert(&mut engine, &mut vpm, &mut notify, 1, b"b");

        // two separate groups: first undo only removes "b"
        engine.undo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.read_range(0, vpm.total_virtual_size(), &mut notify).unwrap(), b"a");
        engine.undo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.total_virtual_size(), 0);
    }

    #[test]
    fn redo_reapplies_and_restores_marks() {
        let clock = ManualClock::new(0);
        let mut engine = UndoEngine::with_clock(UndoConfig::default(), clock);
        let mut vpm = vpm_with(b"hello");
        let mut notify = NotificationSink::new();

        let op = Operation::Insert {
            pos: 5,
            data: b" world".to_vec(),
            timestamp_ms: 0,
        };
        engine.record(op, &vpm);
        vpm.insert_at(5, b" world", &mut notify).unwrap();

        engine.undo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.total_virtual_size(), 5);
        engine.redo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.read_range(0, 11, &mut notify).unwrap(), b"hello world");
    }

    #[test]
    fn transaction_rollback_restores_marks() {
        let clock = ManualClock::new(0);
        let mut engine = UndoEngine::with_clock(UndoConfig::default(), clock);
        let mut vpm = vpm_with(b"0123456789");
        let mut notify = NotificationSink::new();
        let total = vpm.total_virtual_size();
        vpm.marks.set_mark("t", 8, total).unwrap();

        engine.begin_transaction("x", &mut vpm).unwrap();
        let op = Operation::Insert {
            pos: 5,
            data: b"TEMP ".to_vec(),
            timestamp_ms: 0,
        };
        engine.record(op, &vpm);
        vpm.insert_at(5, b"TEMP ", &mut notify).unwrap();
        vpm.marks.set_mark("temp", 15, vpm.total_virtual_size()).unwrap();
        assert_eq!(vpm.marks.get_mark("t"), Some(13));

        engine.rollback_transaction(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.marks.get_mark("t"), Some(8));
        assert_eq!(vpm.marks.get_mark("temp"), None);
        assert_eq!(vpm.total_virtual_size(), 10);
        assert!(!engine.can_undo());
    }

    #[test]
    fn commit_transaction_undoes_as_one_group() {
        let clock = ManualClock::new(0);
        let mut engine = UndoEngine::with_clock(UndoConfig::default(), clock);
        let mut vpm = vpm_with(b"");
        let mut notify = NotificationSink::new();

        engine.begin_transaction("batch", &mut vpm).unwrap();
        for (pos, byte) in [(0u64, b'a'), (1, b'b'), (2, b'c')] {
            let op = Operation::Insert {
                pos,
                data: vec![byte],
                timestamp_ms: 0,
            };
            engine.record(op, &vpm);
            vpm.insert_at(pos, &[byte], &mut notify).unwrap();
        }
        engine.commit_transaction(None).unwrap();
        assert_eq!(vpm.read_range(0, 3, &mut notify).unwrap(), b"abc");

        engine.undo(&mut vpm, &mut notify).unwrap();
        assert_eq!(vpm.total_virtual_size(), 0);
    }
}
