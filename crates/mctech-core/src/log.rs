// crates/mctech-core/src/log.rs
// ============================================================================
// Module: Structured Log Sinks
// Description: JSON-line log records and trace output sinks.
// Purpose: Emit operational logs without hard dependencies on a logger.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Components log through a [`LogSink`], which receives [`LogRecord`]s and
//! writes them as JSON lines. Trace output (slow-log stanzas and full SQL
//! records) uses a separate [`TraceSink`] so deployments can route it to its
//! own file. Both come with stderr, file, in-memory and no-op sinks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

/// One structured log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Emitting component.
    pub target: &'static str,
    /// Message text.
    pub message: String,
    /// Structured fields.
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(level: LogLevel, target: &'static str, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_ms(),
            level,
            target,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

// ============================================================================
// SECTION: Log Sinks
// ============================================================================

/// Receives structured log records.
pub trait LogSink: Send + Sync {
    /// Records one log line.
    fn record(&self, record: &LogRecord);
}

/// Writes JSON lines to stderr.
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(payload) = serde_json::to_string(record) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(payload) = serde_json::to_string(record)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Captured records.
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured records.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|records| records.clone()).unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Discards records.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn record(&self, _record: &LogRecord) {}
}

// ============================================================================
// SECTION: Trace Sinks
// ============================================================================

/// Receives trace entries (slow-log stanzas, full SQL records).
pub trait TraceSink: Send + Sync {
    /// Writes one entry. Entries carry their own line breaks.
    fn write_entry(&self, entry: &str);
}

/// Appends trace entries to a file.
pub struct FileTraceSink {
    /// File handle used for append-only output.
    file: Mutex<std::fs::File>,
}

impl FileTraceSink {
    /// Opens the trace file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TraceSink for FileTraceSink {
    fn write_entry(&self, entry: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(entry.as_bytes());
            let _ = file.flush();
        }
    }
}

/// Keeps trace entries in memory.
#[derive(Default)]
pub struct MemoryTraceSink {
    /// Captured entries.
    entries: Mutex<Vec<String>>,
}

impl MemoryTraceSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured entries.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|entries| entries.clone()).unwrap_or_default()
    }
}

impl TraceSink for MemoryTraceSink {
    fn write_entry(&self, entry: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.to_string());
        }
    }
}

/// Discards trace entries.
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn write_entry(&self, _entry: &str) {}
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis()).unwrap_or(0)
}

/// Truncates `text` to at most `max_bytes`, respecting char boundaries.
#[must_use]
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[.. end]
}
