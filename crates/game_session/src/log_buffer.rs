//! Merged, capacity-bounded visible log.
//!
//! Updates and instructions share one visible surface. After an append the
//! policy of the *appending* stream decides whether the whole log is trimmed
//! back to its capacity, so an unbounded instruction stream can push the log
//! past the cap until the next update arrives.

use std::collections::VecDeque;

/// Number of entries kept after an update append.
pub const DEFAULT_LOG_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Keep at most `n` most-recent entries
    Bounded(usize),
    Unbounded,
}

/// Which stream produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Updates,
    Instructions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub stream: LogStream,
    pub text: String,
}

/// Per-stream capacity policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    pub updates: CapacityPolicy,
    pub instructions: CapacityPolicy,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            updates: CapacityPolicy::Bounded(DEFAULT_LOG_CAPACITY),
            instructions: CapacityPolicy::Unbounded,
        }
    }
}

impl LogPolicy {
    fn for_stream(&self, stream: LogStream) -> CapacityPolicy {
        match stream {
            LogStream::Updates => self.updates,
            LogStream::Instructions => self.instructions,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    policy: LogPolicy,
}

impl LogBuffer {
    pub fn new(policy: LogPolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            policy,
        }
    }

    /// Appends `text` and applies the stream's capacity policy.
    ///
    /// The policy of the appending stream trims the whole merged log, oldest
    /// entries first.
    ///
    /// # Arguments
    ///
    /// * `stream` - Which topic stream the line came from
    /// * `text` - Line to show, already filtered
    ///
    /// # Returns
    ///
    /// How many old entries were discarded.
    pub fn append(&mut self, stream: LogStream, text: impl Into<String>) -> usize {
        self.entries.push_back(LogEntry {
            stream,
            text: text.into(),
        });

        let mut trimmed = 0;
        if let CapacityPolicy::Bounded(capacity) = self.policy.for_stream(stream) {
            while self.entries.len() > capacity {
                self.entries.pop_front();
                trimmed += 1;
            }
        }
        trimmed
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.text.as_str()).collect()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> LogPolicy {
        self.policy
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
