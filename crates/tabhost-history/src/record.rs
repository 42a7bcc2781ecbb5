//! In-memory navigation history.
//!
//! Offsets throughout are signed and measured from the most-forward
//! (newest) entry: `0` is the newest entry, `-1` the one before it, and so
//! on down to `-(len - 1)` for the oldest.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const BLANK_TITLE: &str = "Blank";
pub const BLANK_URI: &str = "about:blank";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub uri: String,
}

impl HistoryEntry {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uri: uri.into(),
        }
    }

    /// The About-Blank sentinel returned for out-of-range lookups.
    pub fn blank() -> Self {
        Self::new(BLANK_TITLE, BLANK_URI)
    }

    pub fn is_blank(&self) -> bool {
        self.uri == BLANK_URI
    }
}

/// A `(uri, offset)` pair as reported by `get_current_item` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub uri: String,
    pub offset: i64,
}

impl HistoryItem {
    pub fn new(uri: impl Into<String>, offset: i64) -> Self {
        Self {
            uri: uri.into(),
            offset,
        }
    }

    pub fn blank() -> Self {
        Self::new(BLANK_URI, 0)
    }
}

/// Ordered entries plus the offset of the current one.
///
/// `current_index` always lies in `offset_range()` (or is `0` for an
/// empty record); constructors clamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryRecord {
    current_index: i64,
    entries: Vec<HistoryEntry>,
}

impl HistoryRecord {
    pub fn new(current_index: i64, entries: Vec<HistoryEntry>) -> Self {
        let current_index = clamp_offset(current_index, entries.len());
        Self {
            current_index,
            entries,
        }
    }

    /// A one-entry record with that entry current.
    pub fn single(entry: HistoryEntry) -> Self {
        Self::new(0, vec![entry])
    }

    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the record has no entries or only blank ones.
    pub fn is_blank(&self) -> bool {
        self.entries.iter().all(HistoryEntry::is_blank)
    }

    /// Valid offsets, `[-(len - 1), 0]`. `None` for an empty record.
    pub fn offset_range(&self) -> Option<RangeInclusive<i64>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(-(self.entries.len() as i64 - 1)..=0)
        }
    }

    /// Position in `entries` of the entry at `offset`.
    pub fn position_of(&self, offset: i64) -> Option<usize> {
        let range = self.offset_range()?;
        if !range.contains(&offset) {
            return None;
        }
        usize::try_from(self.entries.len() as i64 - 1 + offset).ok()
    }

    pub fn current_position(&self) -> Option<usize> {
        self.position_of(self.current_index)
    }

    pub fn current_entry(&self) -> HistoryEntry {
        self.current_position()
            .and_then(|pos| self.entries.get(pos))
            .cloned()
            .unwrap_or_else(HistoryEntry::blank)
    }

    /// Entries strictly before the current one.
    pub fn back_length_from_current(&self) -> usize {
        self.current_position().unwrap_or(0)
    }

    /// Entries strictly after the current one.
    pub fn forward_length_from_current(&self) -> usize {
        self.current_index.unsigned_abs() as usize
    }

    /// Copy with `current_index` replaced (clamped).
    pub fn with_current_index(&self, current_index: i64) -> Self {
        Self::new(current_index, self.entries.clone())
    }

    /// Copy without the forward history, the current entry becoming
    /// the newest.
    pub fn truncate_forward(&self) -> Self {
        match self.current_position() {
            Some(pos) => Self::new(0, self.entries[..=pos].to_vec()),
            None => Self::default(),
        }
    }
}

pub(crate) fn clamp_offset(offset: i64, len: usize) -> i64 {
    if len == 0 {
        return 0;
    }
    offset.clamp(-(len as i64 - 1), 0)
}
