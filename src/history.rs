use std::collections::VecDeque;

use crate::config::DEFAULT_HISTORY_CAPACITY;

/// Rendered when no step has been recorded yet.
pub const EMPTY_HISTORY: &str = "No recent actions";

/// Bounded FIFO of step summaries; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<String>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn append(&mut self, entry: impl Into<String>) {
        self.entries.push_back(entry.into());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Entries joined by newlines, oldest first.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return EMPTY_HISTORY.to_string();
        }
        self.entries
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
