//! Process-global log ring buffer for the admin surface.
//!
//! Entries are sequenced monotonically, categorized, and attributed to a
//! source (the OpenAPI surface or the raw-MCP proxy). The buffer is bounded;
//! appends are O(1) and categorized reads walk the buffer once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Log severity, mirroring the tracing levels the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something degraded but recoverable.
    Warning,
    /// A failed operation.
    Error,
}

/// Which listener produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The main HTTP surface.
    Openapi,
    /// The raw-MCP proxy listener.
    Mcp,
}

impl LogSource {
    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Openapi => "openapi",
            LogSource::Mcp => "mcp",
        }
    }
}

/// One buffered log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonically increasing sequence, process-wide per bus.
    pub sequence: u64,
    /// ISO timestamp of the append.
    pub timestamp: String,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Category tab (errors, http, tools, sessions, health, performance, system).
    pub category: String,
    /// Producing listener.
    pub source: LogSource,
    /// Optional logger name for filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
}

/// Infers a category from a message when the caller has none.
///
/// Mirrors the admin UI tabs: errors beat everything, then keyword matches,
/// then a generic system bucket.
pub fn categorize(level: LogLevel, message: &str) -> &'static str {
    if level == LogLevel::Error {
        return "errors";
    }
    let lower = message.to_lowercase();
    if lower.contains("http") {
        "http"
    } else if lower.contains("tool") {
        "tools"
    } else if lower.contains("session") {
        "sessions"
    } else if lower.contains("connect") || lower.contains("health") {
        "health"
    } else if lower.contains("performance") || lower.contains("slow") || lower.contains("timeout") {
        "performance"
    } else {
        "system"
    }
}

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    sequence: u64,
}

/// Bounded, sequenced log buffer shared by both listeners.
pub struct LogBus {
    max_entries: usize,
    buffer: Mutex<LogBuffer>,
}

impl LogBus {
    /// Creates a bus bounded to `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            buffer: Mutex::new(LogBuffer { entries: VecDeque::new(), sequence: 0 }),
        }
    }

    /// Appends an entry with an explicit category.
    pub fn log_categorized(
        &self,
        level: LogLevel,
        source: LogSource,
        category: &str,
        message: impl Into<String>,
    ) -> u64 {
        let message = message.into();
        let mut buffer = self.buffer.lock().expect("log lock poisoned");
        buffer.sequence += 1;
        let entry = LogEntry {
            sequence: buffer.sequence,
            timestamp: Utc::now().to_rfc3339(),
            level,
            message,
            category: category.to_string(),
            source,
            logger: None,
        };
        buffer.entries.push_back(entry);
        if buffer.entries.len() > self.max_entries {
            buffer.entries.pop_front();
        }
        buffer.sequence
    }

    /// Appends an entry, inferring the category from the message.
    pub fn log(&self, level: LogLevel, source: LogSource, message: impl Into<String>) -> u64 {
        let message = message.into();
        let category = categorize(level, &message);
        self.log_categorized(level, source, category, message)
    }

    /// Reads entries, optionally filtered by source/category, after a
    /// sequence cursor, bounded by `limit` (most recent kept).
    pub fn entries(
        &self,
        source: Option<LogSource>,
        category: Option<&str>,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<LogEntry> {
        let buffer = self.buffer.lock().expect("log lock poisoned");
        let mut selected: Vec<LogEntry> = buffer
            .entries
            .iter()
            .filter(|e| source.is_none_or(|s| e.source == s))
            .filter(|e| category.is_none_or(|c| e.category == c))
            .filter(|e| after.is_none_or(|seq| e.sequence > seq))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if limit > 0 && selected.len() > limit {
                selected.drain(..selected.len() - limit);
            }
        }
        selected
    }

    /// Entries grouped by category, optionally limited to a source.
    pub fn entries_categorized(
        &self,
        source: Option<LogSource>,
    ) -> BTreeMap<String, Vec<LogEntry>> {
        let buffer = self.buffer.lock().expect("log lock poisoned");
        let mut grouped: BTreeMap<String, Vec<LogEntry>> = BTreeMap::new();
        for entry in &buffer.entries {
            if source.is_none_or(|s| entry.source == s) {
                grouped.entry(entry.category.clone()).or_default().push(entry.clone());
            }
        }
        grouped
    }

    /// Distinct categories present, sorted.
    pub fn categories(&self) -> Vec<String> {
        let buffer = self.buffer.lock().expect("log lock poisoned");
        let mut categories: Vec<String> =
            buffer.entries.iter().map(|e| e.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Distinct sources present, sorted.
    pub fn sources(&self) -> Vec<&'static str> {
        let buffer = self.buffer.lock().expect("log lock poisoned");
        let mut sources: Vec<&'static str> =
            buffer.entries.iter().map(|e| e.source.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        sources
    }

    /// Clears entries for a category, or everything when `category` is None.
    pub fn clear(&self, category: Option<&str>) {
        let mut buffer = self.buffer.lock().expect("log lock poisoned");
        match category {
            None => buffer.entries.clear(),
            Some(category) => buffer.entries.retain(|e| e.category != category),
        }
    }

    /// The highest sequence assigned so far.
    pub fn latest_sequence(&self) -> u64 {
        self.buffer.lock().expect("log lock poisoned").sequence
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.buffer.lock().expect("log lock poisoned").entries.len()
    }

    /// True when the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
