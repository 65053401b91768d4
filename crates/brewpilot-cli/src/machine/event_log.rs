//! Diagnostic event log.
//!
//! Every entry gets a sequence number and a local timestamp, is mirrored to
//! `tracing`, and is appended to the log file when one is configured. The
//! most recent entries stay in memory so daemon clients can page through
//! them with `events --after <seq>`.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use brewpilot_core::protocol::EventEntry;
use chrono::Local;
use tracing::{error, info, warn};

/// Entries kept in memory.
pub const TAIL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

struct Inner {
    next_seq: u64,
    tail: VecDeque<EventEntry>,
    file: Option<File>,
}

pub struct EventLog {
    inner: Mutex<Inner>,
}

impl EventLog {
    /// In-memory log without a backing file.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_seq: 1,
                tail: VecDeque::with_capacity(TAIL_CAPACITY),
                file: None,
            }),
        }
    }

    /// Log backed by `path`, truncated on open.
    pub fn with_file(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        let log = Self::in_memory();
        if let Ok(mut inner) = log.inner.lock() {
            inner.file = Some(file);
        }
        Ok(log)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Severity::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(Severity::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Severity::Error, message.into());
    }

    fn record(&self, severity: Severity, message: String) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let entry = EventEntry {
            seq: inner.next_seq,
            timestamp: Local::now().to_rfc3339(),
            message,
        };
        inner.next_seq += 1;

        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{}  {}", entry.timestamp, entry.message) {
                warn!("Failed to append to event log: {}", e);
            }
        }

        if inner.tail.len() == TAIL_CAPACITY {
            inner.tail.pop_front();
        }
        inner.tail.push_back(entry);
    }

    /// Entries with a sequence number greater than `after`, oldest first.
    pub fn entries_after(&self, after: u64) -> Vec<EventEntry> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .tail
                    .iter()
                    .filter(|entry| entry.seq > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Messages currently held in memory.
    pub fn messages(&self) -> Vec<String> {
        self.entries_after(0)
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }
}
