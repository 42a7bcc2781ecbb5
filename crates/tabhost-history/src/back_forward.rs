//! Engine-side back/forward list.
//!
//! Models what a browser engine keeps for one view: an ordered list with a
//! movable cursor. Offsets reported through [`HistoryItem`] are measured
//! from the most-forward entry, matching [`HistoryRecord`].

use crate::record::{HistoryEntry, HistoryItem, HistoryRecord};

const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct BackForwardList {
    entries: Vec<HistoryEntry>,
    current: Option<usize>,
    capacity: usize,
}

impl Default for BackForwardList {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl BackForwardList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest entries are evicted once `capacity` is exceeded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            capacity: capacity.max(1),
        }
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

    /// Visit a new page. Forward history is discarded.
    pub fn navigate(&mut self, entry: HistoryEntry) {
        if let Some(cur) = self.current {
            self.entries.truncate(cur + 1);
        }
        self.entries.push(entry);
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
        self.current = Some(self.entries.len() - 1);
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    /// Rename the current entry once the page reports its title.
    pub fn update_current_title(&mut self, title: impl Into<String>) {
        if let Some(entry) = self.current.and_then(|i| self.entries.get_mut(i)) {
            entry.title = title.into();
        }
    }

    pub fn back_length(&self) -> usize {
        self.current.unwrap_or(0)
    }

    pub fn forward_length(&self) -> usize {
        match self.current {
            Some(cur) => self.entries.len() - 1 - cur,
            None => 0,
        }
    }

    pub fn can_go_back(&self) -> bool {
        self.back_length() > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.forward_length() > 0
    }

    pub fn go_back(&mut self) -> bool {
        self.step(-1)
    }

    pub fn go_forward(&mut self) -> bool {
        self.step(1)
    }

    /// Move the cursor by `delta` relative to the current entry.
    pub fn step(&mut self, delta: i64) -> bool {
        let Some(cur) = self.current else {
            return false;
        };
        let target = cur as i64 + delta;
        if target < 0 || target >= self.entries.len() as i64 {
            return false;
        }
        self.current = Some(target as usize);
        true
    }

    /// Jump to the entry at `offset` from the most-forward entry.
    pub fn go_to_offset(&mut self, offset: i64) -> bool {
        match self.position_of(offset) {
            Some(pos) => {
                self.current = Some(pos);
                true
            }
            None => false,
        }
    }

    /// Entry `delta` steps from the current one (negative is back).
    pub fn nth(&self, delta: i64) -> Option<&HistoryEntry> {
        let cur = self.current? as i64;
        let target = usize::try_from(cur + delta).ok()?;
        self.entries.get(target)
    }

    pub fn current_item(&self) -> HistoryItem {
        self.item_at_delta(0)
    }

    pub fn back_item(&self) -> HistoryItem {
        self.item_at_delta(-1)
    }

    pub fn forward_item(&self) -> HistoryItem {
        self.item_at_delta(1)
    }

    fn item_at_delta(&self, delta: i64) -> HistoryItem {
        let Some(cur) = self.current else {
            return HistoryItem::blank();
        };
        let target = cur as i64 + delta;
        match usize::try_from(target).ok().and_then(|t| self.entries.get(t)) {
            Some(entry) => HistoryItem::new(entry.uri.clone(), target - self.last_index()),
            None => HistoryItem::blank(),
        }
    }

    fn last_index(&self) -> i64 {
        self.entries.len() as i64 - 1
    }

    fn position_of(&self, offset: i64) -> Option<usize> {
        if self.entries.is_empty() || offset > 0 {
            return None;
        }
        usize::try_from(self.last_index() + offset).ok()
    }

    /// Snapshot the list. `override_index` replaces the live offset.
    pub fn snapshot(&self, override_index: Option<i64>) -> HistoryRecord {
        let live = -(self.forward_length() as i64);
        HistoryRecord::new(override_index.unwrap_or(live), self.entries.clone())
    }

    /// Snapshot without forward history, used when duplicating a tab.
    pub fn snapshot_back_only(&self) -> HistoryRecord {
        self.snapshot(None).truncate_forward()
    }

    /// Replace the whole list with `record`, cursor at its current index.
    pub fn restore(&mut self, record: &HistoryRecord) {
        let mut entries = record.entries().to_vec();
        let mut current = record.current_position();
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
            current = current.map(|c| c.saturating_sub(excess));
        }
        self.entries = entries;
        self.current = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visited(uris: &[&str]) -> BackForwardList {
        let mut list = BackForwardList::new();
        for uri in uris {
            list.navigate(HistoryEntry::new(uri.to_uppercase(), *uri));
        }
        list
    }

    #[test]
    fn navigate_moves_cursor_to_newest() {
        let list = visited(&["a", "b", "c"]);
        assert_eq!(list.current().unwrap().uri, "c");
        assert_eq!(list.back_length(), 2);
        assert_eq!(list.forward_length(), 0);
        assert!(list.can_go_back());
        assert!(!list.can_go_forward());
    }

    #[test]
    fn navigate_after_back_discards_forward() {
        let mut list = visited(&["a", "b", "c"]);
        assert!(list.go_back());
        assert!(list.go_back());
        list.navigate(HistoryEntry::new("D", "d"));
        assert_eq!(list.len(), 2);
        assert_eq!(list.current().unwrap().uri, "d");
        assert!(!list.can_go_forward());
    }

    #[test]
    fn back_and_forward_stop_at_edges() {
        let mut list = visited(&["a"]);
        assert!(!list.go_back());
        assert!(!list.go_forward());

        let mut empty = BackForwardList::new();
        assert!(!empty.go_back());
        assert_eq!(empty.current_item(), HistoryItem::blank());
    }

    #[test]
    fn items_report_offsets_from_newest_entry() {
        let mut list = visited(&["a", "b", "c"]);
        list.go_back();
        assert_eq!(list.current_item(), HistoryItem::new("b", -1));
        assert_eq!(list.back_item(), HistoryItem::new("a", -2));
        assert_eq!(list.forward_item(), HistoryItem::new("c", 0));

        list.go_forward();
        assert_eq!(list.forward_item(), HistoryItem::blank());
    }

    #[test]
    fn go_to_offset_uses_newest_anchored_frame() {
        let mut list = visited(&["a", "b", "c"]);
        assert!(list.go_to_offset(-2));
        assert_eq!(list.current().unwrap().uri, "a");
        assert!(list.go_to_offset(0));
        assert_eq!(list.current().unwrap().uri, "c");
        assert!(!list.go_to_offset(1));
        assert!(!list.go_to_offset(-3));
    }

    #[test]
    fn snapshot_and_restore() {
        let mut list = visited(&["a", "b", "c"]);
        list.go_back();
        let record = list.snapshot(None);
        assert_eq!(record.current_index(), -1);
        assert_eq!(record.len(), 3);

        let mut other = BackForwardList::new();
        other.restore(&record);
        assert_eq!(other.current().unwrap().uri, "b");
        assert_eq!(other.snapshot(None), record);
    }

    #[test]
    fn snapshot_override_and_back_only() {
        let mut list = visited(&["a", "b", "c"]);
        list.go_back();
        assert_eq!(list.snapshot(Some(0)).current_index(), 0);

        let back_only = list.snapshot_back_only();
        assert_eq!(back_only.len(), 2);
        assert_eq!(back_only.current_entry().uri, "b");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut list = BackForwardList::with_capacity(2);
        for uri in ["a", "b", "c"] {
            list.navigate(HistoryEntry::new(uri, uri));
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list.nth(-1).unwrap().uri, "b");
    }

    #[test]
    fn update_title_renames_current() {
        let mut list = visited(&["a"]);
        list.update_current_title("Alpha");
        assert_eq!(list.current().unwrap().title, "Alpha");
    }
}
