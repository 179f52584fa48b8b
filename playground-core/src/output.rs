//! Output log model
//!
//! An ordered, append-only sequence of [`OutputRecord`]s that is cleared at the
//! start of every run. Subscribers are notified synchronously after each
//! mutation, so every view observes the post-append state before the next
//! event is processed.

use crate::observe::{Listeners, SubscriptionId};
use parking_lot::RwLock;
use playground_types::OutputRecord;
use std::sync::atomic::{AtomicU64, Ordering};

/// Form feed: a log line containing it clears the screen
pub const CLEAR_MARKER: char = '\u{000C}';

#[derive(Debug, Default)]
pub struct OutputLog {
    records: RwLock<Vec<OutputRecord>>,
    listeners: Listeners<[OutputRecord]>,
    clears: AtomicU64,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the record sequence to empty
    pub fn clear(&self) {
        {
            let mut records = self.records.write();
            records.clear();
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        self.notify();
    }

    /// Add a record to the end of the log.
    ///
    /// A non-error record containing [`CLEAR_MARKER`] clears the log instead;
    /// text after the last marker, if any, becomes the first new record.
    pub fn append(&self, record: OutputRecord) {
        {
            let mut records = self.records.write();
            if !record.is_error && record.text.contains(CLEAR_MARKER) {
                records.clear();
                self.clears.fetch_add(1, Ordering::SeqCst);
                let rest = record
                    .text
                    .rsplit(CLEAR_MARKER)
                    .next()
                    .unwrap_or_default();
                if !rest.is_empty() {
                    records.push(OutputRecord::log(rest));
                }
            } else {
                records.push(record);
            }
        }
        self.notify();
    }

    pub fn log(&self, text: impl Into<String>) {
        self.append(OutputRecord::log(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.append(OutputRecord::error(text));
    }

    /// Snapshot of the current records
    pub fn records(&self) -> Vec<OutputRecord> {
        self.records.read().clone()
    }

    /// How many times the log has been cleared, by [`clear`](Self::clear)
    /// or by a clear marker. Views printing incrementally use it to notice
    /// that the records were replaced rather than extended.
    pub fn clear_count(&self) -> u64 {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.records.read().iter().any(|r| r.is_error)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[OutputRecord]) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn notify(&self) {
        // Listeners get a snapshot so they may read the log again without
        // holding the lock
        let snapshot = self.records();
        self.listeners.notify(&snapshot);
    }
}
