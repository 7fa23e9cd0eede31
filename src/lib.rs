//! Paged byte-buffer engine for editing files of arbitrary size with a
//! bounded in-memory working set.
//!
//! [`Buffer`] is the entry point: it wraps a [`vpm::VirtualPageManager`]
//! (address translation, lazy load/evict, page split/merge), an optional
//! [`undo::UndoEngine`] (time+locality merge-windowed undo/redo), and the
//! [`safe_save`] planner (conflict-aware write-strategy selection), and
//! exposes them as one byte-addressable, line-aware, markable document.

pub mod buffer;
pub mod clock;
pub mod error;
pub mod marks;
pub mod notify;
pub mod page;
pub mod safe_save;
pub mod undo;
pub mod vpm;

pub use buffer::{Buffer, BufferState, ChangeStrategy, ChangeStrategyConfig, FileChangeReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BufferError, Result};
pub use marks::MarksManager;
pub use notify::{Notification, NotificationHandler, NotificationSink, NotificationType, Severity};
pub use page::{MemoryPageStorage, PageStorage};
pub use safe_save::{SafeWriteConfig, WriteStrategy};
pub use undo::{Operation, UndoConfig, UndoEngine};
pub use vpm::{LineInfo, VirtualPageManager, VpmConfig};
