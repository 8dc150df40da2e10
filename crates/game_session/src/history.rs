//! Command history with cursor recall.
//!
//! Every change to the input line is recorded, not just submissions, so
//! recalling walks back through intermediate keystrokes as well.

#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: Vec<String>,
    cursor: usize,
    input: String,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new input value and resets the cursor.
    ///
    /// Every change is kept, so recall steps through intermediate values too.
    pub fn record_input(&mut self, value: impl Into<String>) {
        let value = value.into();
        self.entries.push(value.clone());
        self.input = value;
        self.cursor = 0;
    }

    /// Steps back one entry. Returns the new input, or `None` at the oldest.
    pub fn recall_previous(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        let idx = self.entries.len() - 1 - self.cursor;
        self.input = self.entries[idx].clone();
        self.cursor += 1;
        Some(&self.input)
    }

    /// Steps forward one entry. Returns the new input, or `None` at the newest.
    pub fn recall_next(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        let idx = self.entries.len() - self.cursor;
        self.input = self.entries[idx].clone();
        self.cursor -= 1;
        Some(&self.input)
    }

    /// Clears the input field and returns what it held. History is kept.
    pub fn take_input(&mut self) -> String {
        std::mem::take(&mut self.input)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}
