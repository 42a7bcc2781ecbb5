//! Recently closed tabs, most recent first.

use crate::record::{PositionedRecord, TabRecord};
use crate::store::{decode_session, encode_session};
use std::collections::VecDeque;
use tabhost_common::SessionError;
use tabhost_tabs::TabSlot;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTab {
    /// Where the tab sat in the strip.
    pub index: usize,
    pub record: TabRecord,
    pub title: String,
    pub uri: String,
}

impl ClosedTab {
    pub fn from_record(index: usize, record: TabRecord) -> Self {
        let current = record.history.current_entry();
        Self {
            index,
            title: current.title,
            uri: current.uri,
            record,
        }
    }

    /// Snapshot a tab that is about to close. `None` when there is
    /// nothing to reopen.
    pub async fn capture(index: usize, slot: &TabSlot) -> Option<Self> {
        let history = slot.tab.get_history(None).await.ok()?;
        if history.is_blank() {
            return None;
        }
        let record = TabRecord {
            process_id: slot.tab.process_id(),
            state: slot.state,
            history,
        };
        Some(Self::from_record(index, record))
    }
}

#[derive(Debug, Clone)]
pub struct ClosedTabs {
    entries: VecDeque<ClosedTab>,
    capacity: usize,
}

impl ClosedTabs {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Blank tabs are not remembered. The oldest entry falls off at
    /// capacity.
    pub fn record_closed(&mut self, tab: ClosedTab) {
        if tab.record.is_blank() {
            return;
        }
        self.entries.push_front(tab);
        while self.entries.len() > self.capacity {
            if let Some(dropped) = self.entries.pop_back() {
                debug!(uri = %dropped.uri, "forgetting closed tab");
            }
        }
    }

    /// Take the `n`th most recently closed tab (0 = latest).
    pub fn reopen(&mut self, n: usize) -> Option<ClosedTab> {
        self.entries.remove(n)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClosedTab> {
        self.entries.iter()
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

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Encode in session format, most recent first.
    pub fn export(&self) -> Result<String, SessionError> {
        let records: Vec<PositionedRecord> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, tab)| PositionedRecord {
                index,
                record: tab.record.clone(),
            })
            .collect();
        encode_session(&records)
    }

    /// Add tabs from an exported list, keeping their order. Returns how
    /// many were added.
    pub fn import(&mut self, raw: &str) -> Result<usize, SessionError> {
        let records = decode_session(raw)?;
        let count = records.len();
        for positioned in records.into_iter().rev() {
            self.record_closed(ClosedTab::from_record(positioned.index, positioned.record));
        }
        Ok(count)
    }
}

impl Default for ClosedTabs {
    fn default() -> Self {
        Self::new(25)
    }
}
