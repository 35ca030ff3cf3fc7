//! Fixed-capacity ring buffer for a single server's captured log entries.

use crate::types::{LogEntry, LogLevel, LogSource};
use std::collections::VecDeque;

/// Bounded FIFO of [`LogEntry`] values. Oldest entries are dropped once the
/// buffer reaches `max_size`.
#[derive(Debug)]
pub struct LogRingBuffer {
    buffer: VecDeque<LogEntry>,
    max_size: usize,
}

impl LogRingBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn add_entry(&mut self, entry: LogEntry) {
        if self.buffer.len() >= self.max_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    /// Returns up to the `count` most recently added entries, oldest first.
    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let start = if count >= self.buffer.len() { 0 } else { self.buffer.len() - count };
        self.buffer.iter().skip(start).cloned().collect()
    }

    pub fn get_all(&self) -> Vec<LogEntry> {
        self.buffer.iter().cloned().collect()
    }

    pub fn get_in_range(&self, start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>) -> Vec<LogEntry> {
        self.buffer.iter().filter(|entry| entry.timestamp >= start && entry.timestamp <= end).cloned().collect()
    }

    pub fn get_by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.buffer.iter().filter(|entry| entry.level == level).cloned().collect()
    }

    pub fn get_by_source(&self, source: LogSource) -> Vec<LogEntry> {
        self.buffer.iter().filter(|entry| entry.source == source).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.buffer.len() > max_size {
            self.buffer.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message.to_string(), LogSource::System, "test".to_string())
    }

    #[test]
    fn basic_add_and_len() {
        let mut buffer = LogRingBuffer::new(3);
        assert!(buffer.is_empty());
        buffer.add_entry(entry("hello"));
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buffer = LogRingBuffer::new(2);
        for i in 0..5 {
            buffer.add_entry(entry(&format!("message {i}")));
        }
        assert_eq!(buffer.len(), 2);
        assert!(buffer.is_full());

        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "message 3");
        assert_eq!(recent[1].message, "message 4");
    }

    #[test]
    fn filters_by_level_and_source() {
        let mut buffer = LogRingBuffer::new(10);
        buffer.add_entry(LogEntry::new(LogLevel::Info, "info".to_string(), LogSource::System, "test".to_string()));
        buffer.add_entry(LogEntry::new(LogLevel::Error, "err".to_string(), LogSource::Stderr, "test".to_string()));

        assert_eq!(buffer.get_by_level(LogLevel::Info).len(), 1);
        assert_eq!(buffer.get_by_source(LogSource::Stderr).len(), 1);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = LogRingBuffer::new(10);
        buffer.add_entry(entry("x"));
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn shrinking_max_size_evicts_excess() {
        let mut buffer = LogRingBuffer::new(10);
        for i in 0..5 {
            buffer.add_entry(entry(&format!("m{i}")));
        }
        buffer.set_max_size(2);
        assert_eq!(buffer.len(), 2);
    }
}
