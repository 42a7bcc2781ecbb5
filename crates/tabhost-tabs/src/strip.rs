//! Ordered tabs of one window.

use crate::control::TabControl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tabhost_common::TabError;

/// Visibility of a tab in the strip. Persisted as a one-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TabState {
    #[default]
    #[serde(rename = "N")]
    Normal,
    #[serde(rename = "M")]
    Minimized,
    #[serde(rename = "H")]
    Hidden,
}

impl TabState {
    pub fn code(self) -> &'static str {
        match self {
            TabState::Normal => "N",
            TabState::Minimized => "M",
            TabState::Hidden => "H",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(TabState::Normal),
            "M" => Some(TabState::Minimized),
            "H" => Some(TabState::Hidden),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct TabSlot {
    pub tab: Arc<dyn TabControl>,
    pub state: TabState,
}

impl TabSlot {
    pub fn socket_id(&self) -> u64 {
        self.tab.socket_id()
    }
}

/// Socket ids are unique within a strip.
#[derive(Clone, Default)]
pub struct TabStrip {
    slots: Vec<TabSlot>,
    active: Option<u64>,
}

impl TabStrip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at `position` (clamped to the end). Returns the index used.
    pub fn insert(
        &mut self,
        position: usize,
        tab: Arc<dyn TabControl>,
        state: TabState,
    ) -> Result<usize, TabError> {
        let socket_id = tab.socket_id();
        if self.position_of(socket_id).is_some() {
            return Err(TabError::DuplicateSocket(socket_id));
        }
        let index = position.min(self.slots.len());
        self.slots.insert(index, TabSlot { tab, state });
        if self.active.is_none() {
            self.active = Some(socket_id);
        }
        Ok(index)
    }

    pub fn push(&mut self, tab: Arc<dyn TabControl>, state: TabState) -> Result<usize, TabError> {
        self.insert(self.slots.len(), tab, state)
    }

    /// Take the tab out of the strip. The tab itself is not closed.
    pub fn remove(&mut self, socket_id: u64) -> Option<(usize, TabSlot)> {
        let index = self.position_of(socket_id)?;
        let slot = self.slots.remove(index);
        if self.active == Some(socket_id) {
            let next = index.min(self.slots.len().saturating_sub(1));
            self.active = self.slots.get(next).map(TabSlot::socket_id);
        }
        Some((index, slot))
    }

    pub fn position_of(&self, socket_id: u64) -> Option<usize> {
        self.slots.iter().position(|slot| slot.socket_id() == socket_id)
    }

    pub fn get(&self, index: usize) -> Option<&TabSlot> {
        self.slots.get(index)
    }

    pub fn find(&self, socket_id: u64) -> Option<&TabSlot> {
        self.slots.iter().find(|slot| slot.socket_id() == socket_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set_state(&mut self, socket_id: u64, state: TabState) -> bool {
        match self.slots.iter_mut().find(|slot| slot.socket_id() == socket_id) {
            Some(slot) => {
                slot.state = state;
                true
            }
            None => false,
        }
    }

    pub fn move_to(&mut self, socket_id: u64, position: usize) -> bool {
        let Some(from) = self.position_of(socket_id) else {
            return false;
        };
        let slot = self.slots.remove(from);
        let to = position.min(self.slots.len());
        self.slots.insert(to, slot);
        true
    }

    pub fn active(&self) -> Option<u64> {
        self.active
    }

    pub fn set_active(&mut self, socket_id: u64) -> bool {
        let known = self.position_of(socket_id).is_some();
        if known {
            self.active = Some(socket_id);
        }
        known
    }
}
