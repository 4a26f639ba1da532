use chrono::Utc;
use serde::Serialize;

/// Fixed per-record overhead counted towards batch and memory limits (the
/// 32-bit log time).
const TIME_SIZE_IN_BYTES: usize = 4;

/// A single key/value pair of a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogContent {
    pub key: String,
    pub value: String,
}

/// A log record as submitted by the application.
///
/// The producer never looks inside the contents; it only needs
/// [`LogItem::size_in_bytes`] for admission and batch accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogItem {
    /// Unix time in seconds.
    pub time: u32,
    pub contents: Vec<LogContent>,
}

impl LogItem {
    /// Empty record stamped with the current time.
    pub fn new() -> Self {
        Self::with_time(Utc::now().timestamp().max(0) as u32)
    }

    pub fn with_time(time: u32) -> Self {
        LogItem {
            time,
            contents: Vec::new(),
        }
    }

    pub fn push_back(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.contents.push(LogContent {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Builder-style variant of [`LogItem::push_back`].
    pub fn with_content(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_back(key, value);
        self
    }

    /// Serialized size used for memory admission and batch thresholds.
    pub fn size_in_bytes(&self) -> usize {
        TIME_SIZE_IN_BYTES
            + self
                .contents
                .iter()
                .map(|c| c.key.len() + c.value.len())
                .sum::<usize>()
    }
}

impl Default for LogItem {
    fn default() -> Self {
        Self::new()
    }
}

/// Summed size of a list of records.
pub fn total_size_in_bytes(items: &[LogItem]) -> usize {
    items.iter().map(LogItem::size_in_bytes).sum()
}
