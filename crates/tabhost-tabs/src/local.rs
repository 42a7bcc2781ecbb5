//! In-process tab: the engine lives in the window process.

use crate::control::{FindRequest, HighlightRequest, TabControl, TabKind, ZoomDirection};
use crate::engine::{EngineStatus, TabEngine};
use crate::events::TabEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tabhost_common::sync::lock;
use tabhost_common::{EventBus, TabError};
use tabhost_history::{HistoryItem, HistoryRecord};

pub struct LocalTab {
    socket_id: u64,
    engine: Mutex<Box<dyn TabEngine>>,
    status: Mutex<EngineStatus>,
    events: EventBus<TabEvent>,
    closed: AtomicBool,
}

impl LocalTab {
    pub fn new(socket_id: u64, engine: Box<dyn TabEngine>, events: EventBus<TabEvent>) -> Self {
        let status = engine.status();
        Self {
            socket_id,
            engine: Mutex::new(engine),
            status: Mutex::new(status),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Run `f` against the engine and publish whatever changed.
    fn with_engine<R>(&self, f: impl FnOnce(&mut dyn TabEngine) -> R) -> Result<R, TabError> {
        if self.is_closed() {
            return Err(TabError::Closed);
        }
        let (result, current) = {
            let mut engine = lock(&self.engine);
            let result = f(engine.as_mut());
            (result, engine.status())
        };

        let changes = {
            let mut status = lock(&self.status);
            let changes = current.changes_since(&status);
            *status = current;
            changes
        };
        for change in &changes {
            if let Some(event) = TabEvent::from_notification(self.socket_id, change) {
                self.events.publish(event);
            }
        }
        Ok(result)
    }

    fn command(&self, f: impl FnOnce(&mut dyn TabEngine)) {
        let _ = self.with_engine(f);
    }
}

#[async_trait]
impl TabControl for LocalTab {
    fn socket_id(&self) -> u64 {
        self.socket_id
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    fn kind(&self) -> TabKind {
        TabKind::Local
    }

    fn title(&self) -> String {
        lock(&self.status).title.clone()
    }

    fn uri(&self) -> String {
        lock(&self.status).uri.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn load_uri(&self, uri: &str) {
        self.command(|engine| engine.load_uri(uri));
    }

    fn go_back(&self) {
        self.command(|engine| engine.go_back());
    }

    fn go_forward(&self) {
        self.command(|engine| engine.go_forward());
    }

    fn go_to_history_item(&self, offset: i64) {
        self.command(|engine| engine.go_to_history_item(offset));
    }

    fn stop_loading(&self) {
        self.command(|engine| engine.stop_loading());
    }

    fn reload(&self) {
        self.command(|engine| engine.reload());
    }

    fn zoom(&self, direction: ZoomDirection) {
        self.command(|engine| engine.zoom(direction));
    }

    fn print_page(&self) {
        self.command(|engine| engine.print_page());
    }

    fn set_highlight(&self, request: HighlightRequest) {
        self.command(|engine| engine.set_highlight(&request));
    }

    fn set_history(&self, record: &HistoryRecord) {
        self.command(|engine| engine.set_history(record));
    }

    async fn find(&self, request: FindRequest) -> Result<u32, TabError> {
        self.with_engine(|engine| engine.find(&request))
    }

    async fn get_history(&self, override_index: Option<i64>) -> Result<HistoryRecord, TabError> {
        self.with_engine(|engine| engine.history().snapshot(override_index))
    }

    async fn get_back_history(&self) -> Result<HistoryRecord, TabError> {
        self.with_engine(|engine| engine.history().snapshot_back_only())
    }

    async fn get_current_item(&self) -> Result<HistoryItem, TabError> {
        self.with_engine(|engine| engine.history().current_item())
    }

    async fn get_back_item(&self) -> Result<HistoryItem, TabError> {
        self.with_engine(|engine| engine.history().back_item())
    }

    async fn get_forward_item(&self) -> Result<HistoryItem, TabError> {
        self.with_engine(|engine| engine.history().forward_item())
    }

    async fn can_go_back(&self) -> Result<bool, TabError> {
        self.with_engine(|engine| engine.history().can_go_back())
    }

    async fn can_go_forward(&self) -> Result<bool, TabError> {
        self.with_engine(|engine| engine.history().can_go_forward())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.publish(TabEvent::Closed {
                socket_id: self.socket_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessEngine;
    use tabhost_history::HistoryEntry;

    fn tab() -> (LocalTab, tokio::sync::broadcast::Receiver<TabEvent>) {
        let events = EventBus::new(64);
        let rx = events.subscribe();
        (LocalTab::new(3, Box::new(HeadlessEngine::new()), events), rx)
    }

    #[tokio::test]
    async fn load_publishes_changes() {
        let (tab, mut rx) = tab();
        tab.load_uri("https://a");
        assert_eq!(tab.uri(), "https://a");
        assert_eq!(
            rx.recv().await.unwrap(),
            TabEvent::UriChanged {
                socket_id: 3,
                uri: "https://a".into()
            }
        );
        assert_eq!(tab.process_id(), None);
        assert_eq!(tab.identity(), None);
    }

    #[tokio::test]
    async fn queries_resolve_from_engine() {
        let (tab, _rx) = tab();
        tab.load_uri("https://a");
        tab.load_uri("https://b");
        tab.load_uri("https://c");
        tab.go_back();

        assert!(tab.can_go_back().await.unwrap());
        assert!(tab.can_go_forward().await.unwrap());
        assert_eq!(tab.get_current_item().await.unwrap(), HistoryItem::new("https://b", -1));
        assert_eq!(tab.get_back_item().await.unwrap(), HistoryItem::new("https://a", -2));
        assert_eq!(tab.get_forward_item().await.unwrap(), HistoryItem::new("https://c", 0));

        let history = tab.get_history(None).await.unwrap();
        assert_eq!(history.current_index(), -1);
        assert_eq!(history.len(), 3);
        assert_eq!(tab.get_back_history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_history_then_go_to_item() {
        let (tab, _rx) = tab();
        let record = HistoryRecord::new(
            0,
            vec![
                HistoryEntry::new("A", "https://a"),
                HistoryEntry::new("B", "https://b"),
                HistoryEntry::new("C", "https://c"),
            ],
        );
        tab.set_history(&record);
        assert_eq!(tab.title(), "C");
        tab.go_to_history_item(-2);
        assert_eq!(tab.uri(), "https://a");
    }

    #[tokio::test]
    async fn closed_tab_ignores_everything() {
        let (tab, mut rx) = tab();
        tab.close().await;
        tab.close().await;
        assert_eq!(rx.recv().await.unwrap(), TabEvent::Closed { socket_id: 3 });
        assert!(rx.try_recv().is_err());

        tab.load_uri("https://a");
        assert_eq!(tab.uri(), tabhost_history::BLANK_URI);
        assert_eq!(tab.can_go_back().await, Err(TabError::Closed));
    }
}
