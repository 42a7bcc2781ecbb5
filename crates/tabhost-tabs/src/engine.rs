//! The page engine behind a tab.
//!
//! Rendering is out of scope here; [`HeadlessEngine`] keeps navigation
//! state so the same tab logic runs in-process and in tab processes.

use crate::control::{FindRequest, HighlightRequest, ZoomDirection};
use crate::wire::TabNotification;
use std::sync::Arc;
use tabhost_history::{BackForwardList, HistoryEntry, HistoryRecord, BLANK_TITLE, BLANK_URI};

const ZOOM_STEP: f64 = 0.1;
const ZOOM_MIN: f64 = 0.3;
const ZOOM_MAX: f64 = 3.0;

/// What a tab reports upward after each operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub title: String,
    pub uri: String,
    pub progress: f64,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            title: BLANK_TITLE.to_string(),
            uri: BLANK_URI.to_string(),
            progress: 0.0,
            can_go_back: false,
            can_go_forward: false,
        }
    }
}

impl EngineStatus {
    /// Notifications describing how `self` differs from `previous`.
    pub fn changes_since(&self, previous: &EngineStatus) -> Vec<TabNotification> {
        let mut changes = Vec::new();
        if self.uri != previous.uri {
            changes.push(TabNotification::Uri {
                uri: self.uri.clone(),
            });
        }
        if self.title != previous.title {
            changes.push(TabNotification::Title {
                title: self.title.clone(),
            });
        }
        if self.progress != previous.progress {
            changes.push(TabNotification::Progress {
                progress: self.progress,
            });
        }
        if self.can_go_back != previous.can_go_back || self.can_go_forward != previous.can_go_forward {
            changes.push(TabNotification::BackForward {
                can_go_back: self.can_go_back,
                can_go_forward: self.can_go_forward,
            });
        }
        changes
    }
}

pub trait TabEngine: Send {
    fn load_uri(&mut self, uri: &str);
    fn go_back(&mut self);
    fn go_forward(&mut self);
    /// `offset` is relative to the most-forward entry (`0` or negative).
    fn go_to_history_item(&mut self, offset: i64);
    fn stop_loading(&mut self);
    fn reload(&mut self);
    fn zoom(&mut self, direction: ZoomDirection);
    fn print_page(&mut self);
    fn set_highlight(&mut self, request: &HighlightRequest);
    /// Number of matches for `request`.
    fn find(&mut self, request: &FindRequest) -> u32;
    fn set_history(&mut self, record: &HistoryRecord);
    fn history(&self) -> &BackForwardList;
    fn status(&self) -> EngineStatus;
}

pub type EngineFactory = Arc<dyn Fn() -> Box<dyn TabEngine> + Send + Sync>;

pub fn headless_factory() -> EngineFactory {
    Arc::new(|| Box::new(HeadlessEngine::new()) as Box<dyn TabEngine>)
}

// =============================================================================
// HEADLESS ENGINE
// =============================================================================

/// Loads complete instantly and a page's title is its uri.
#[derive(Debug, Clone)]
pub struct HeadlessEngine {
    history: BackForwardList,
    progress: f64,
    zoom: f64,
    highlight: Option<HighlightRequest>,
    printed: u32,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self {
            history: BackForwardList::new(),
            progress: 0.0,
            zoom: 1.0,
            highlight: None,
            printed: 0,
        }
    }

    pub fn zoom_level(&self) -> f64 {
        self.zoom
    }

    pub fn highlight(&self) -> Option<&HighlightRequest> {
        self.highlight.as_ref()
    }

    pub fn pages_printed(&self) -> u32 {
        self.printed
    }

    fn finish_load(&mut self) {
        self.progress = 1.0;
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TabEngine for HeadlessEngine {
    fn load_uri(&mut self, uri: &str) {
        self.progress = 0.0;
        self.history.navigate(HistoryEntry::new(uri, uri));
        self.finish_load();
    }

    fn go_back(&mut self) {
        if self.history.go_back() {
            self.finish_load();
        }
    }

    fn go_forward(&mut self) {
        if self.history.go_forward() {
            self.finish_load();
        }
    }

    fn go_to_history_item(&mut self, offset: i64) {
        if self.history.go_to_offset(offset) {
            self.finish_load();
        }
    }

    fn stop_loading(&mut self) {
        if self.progress < 1.0 {
            self.progress = 1.0;
        }
    }

    fn reload(&mut self) {
        self.progress = 0.0;
        self.finish_load();
    }

    fn zoom(&mut self, direction: ZoomDirection) {
        self.zoom = match direction {
            ZoomDirection::In => (self.zoom + ZOOM_STEP).min(ZOOM_MAX),
            ZoomDirection::Out => (self.zoom - ZOOM_STEP).max(ZOOM_MIN),
            ZoomDirection::Reset => 1.0,
        };
    }

    fn print_page(&mut self) {
        self.printed += 1;
    }

    fn set_highlight(&mut self, request: &HighlightRequest) {
        self.highlight = request.highlight.then(|| request.clone());
    }

    fn find(&mut self, request: &FindRequest) -> u32 {
        if request.text.is_empty() {
            return 0;
        }
        let Some(entry) = self.history.current() else {
            return 0;
        };
        let haystack = format!("{}\n{}", entry.title, entry.uri);
        let count = if request.case_sensitive {
            haystack.matches(request.text.as_str()).count()
        } else {
            haystack
                .to_lowercase()
                .matches(request.text.to_lowercase().as_str())
                .count()
        };
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn set_history(&mut self, record: &HistoryRecord) {
        self.history.restore(record);
        self.finish_load();
    }

    fn history(&self) -> &BackForwardList {
        &self.history
    }

    fn status(&self) -> EngineStatus {
        let (title, uri) = match self.history.current() {
            Some(entry) => (entry.title.clone(), entry.uri.clone()),
            None => (BLANK_TITLE.to_string(), BLANK_URI.to_string()),
        };
        EngineStatus {
            title,
            uri,
            progress: self.progress,
            can_go_back: self.history.can_go_back(),
            can_go_forward: self.history.can_go_forward(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_is_blank() {
        let engine = HeadlessEngine::new();
        assert_eq!(engine.status(), EngineStatus::default());
    }

    #[test]
    fn navigation_updates_status() {
        let mut engine = HeadlessEngine::new();
        engine.load_uri("https://a");
        engine.load_uri("https://b");
        let status = engine.status();
        assert_eq!(status.uri, "https://b");
        assert!(status.can_go_back);
        assert!(!status.can_go_forward);
        assert_eq!(status.progress, 1.0);

        engine.go_back();
        assert_eq!(engine.status().uri, "https://a");
        assert!(engine.status().can_go_forward);
    }

    #[test]
    fn changes_since_reports_only_differences() {
        let before = EngineStatus::default();
        let mut after = before.clone();
        assert!(after.changes_since(&before).is_empty());

        after.uri = "https://a".into();
        after.can_go_back = true;
        let changes = after.changes_since(&before);
        assert_eq!(
            changes,
            vec![
                TabNotification::Uri {
                    uri: "https://a".into()
                },
                TabNotification::BackForward {
                    can_go_back: true,
                    can_go_forward: false
                },
            ]
        );
    }

    #[test]
    fn zoom_is_clamped() {
        let mut engine = HeadlessEngine::new();
        for _ in 0..50 {
            engine.zoom(ZoomDirection::In);
        }
        assert!((engine.zoom_level() - ZOOM_MAX).abs() < 1e-9);
        engine.zoom(ZoomDirection::Reset);
        assert_eq!(engine.zoom_level(), 1.0);
    }

    #[test]
    fn find_counts_matches() {
        let mut engine = HeadlessEngine::new();
        engine.load_uri("https://rust-lang.org/rust");
        assert_eq!(engine.find(&FindRequest::new("RUST")), 4);
        let mut exact = FindRequest::new("RUST");
        exact.case_sensitive = true;
        assert_eq!(engine.find(&exact), 0);
        assert_eq!(engine.find(&FindRequest::new("")), 0);
    }

    #[test]
    fn highlight_cleared_when_disabled() {
        let mut engine = HeadlessEngine::new();
        let mut req = HighlightRequest {
            text: "x".into(),
            case_sensitive: false,
            highlight: true,
        };
        engine.set_highlight(&req);
        assert!(engine.highlight().is_some());
        req.highlight = false;
        engine.set_highlight(&req);
        assert!(engine.highlight().is_none());
    }

    #[test]
    fn set_history_replaces_list() {
        let mut engine = HeadlessEngine::new();
        engine.load_uri("https://old");
        let record = HistoryRecord::new(
            -1,
            vec![
                HistoryEntry::new("A", "https://a"),
                HistoryEntry::new("B", "https://b"),
            ],
        );
        engine.set_history(&record);
        assert_eq!(engine.status().uri, "https://a");
        assert_eq!(engine.history().snapshot(None), record);
    }
}
