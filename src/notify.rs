// src/notify.rs — structured event notifications for external observers
// Maintained in the style of nonosctl::logging, replacing its bespoke
// signed log-line format with a plain serde record plus a tracing emission,
// since request signing has no meaning inside the engine.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a `Notification`, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// The recognized notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FileModifiedOnDisk,
    PageSplit,
    PageMerged,
    PageEvicted,
    PageDataUnavailable,
    BufferDetached,
    StorageError,
    PartialDataDetected,
    PageSkipped,
    DetachedPageUsed,
    SaveAnalysisComplete,
    SaveCompleted,
    BackupCreated,
    BackupRestored,
    BufferContentLoaded,
}

/// A single structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Observer interface external consumers implement to receive notifications.
///
/// Per the design note on reentrancy: a handler must not call back into a
/// mutating buffer method from within `on_notification`. Nothing here
/// enforces that; it is a contract violation left to the caller to respect.
pub trait NotificationHandler {
    fn on_notification(&mut self, notification: &Notification);
}

/// Fan-out sink holding zero or more registered handlers, plus the
/// `tracing` emission every notification also receives.
#[derive(Default)]
pub struct NotificationSink {
    handlers: Vec<Box<dyn NotificationHandler>>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    pub fn emit(&mut self, notification: Notification) {
        match notification.severity {
            Severity::Debug => tracing::debug!(kind = ?notification.kind, "{}", notification.message),
            Severity::Info => tracing::info!(kind = ?notification.kind, "{}", notification.message),
            Severity::Warning => tracing::warn!(kind = ?notification.kind, "{}", notification.message),
            Severity::Error => tracing::error!(kind = ?notification.kind, "{}", notification.message),
        }
        for handler in &mut self.handlers {
            handler.on_notification(&notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    struct Collector(Rc<RefCell<Vec<NotificationType>>>);
    impl NotificationHandler for Collector {
        fn on_notification(&mut self, notification: &Notification) {
            self.0.borrow_mut().push(notification.kind);
        }
    }

    #[test]
    fn fan_out_delivers_to_all_handlers() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sink = NotificationSink::new();
        sink.register(Box::new(Collector(seen.clone())));
        sink.emit(Notification::new(
            NotificationType::PageSplit,
            Severity::Info,
            "page split",
        ));
        assert_eq!(seen.borrow().as_slice(), &[NotificationType::PageSplit]);
    }

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }
}
