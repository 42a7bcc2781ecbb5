//! The window: its tab strip, closed-tab list and session file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tabhost_common::sync::lock;
use tabhost_common::{next_socket_id, TabhostError};
use tabhost_session::{
    capture, capture_slots, decode_session, encode_session, load, restore, save, ClosedTab,
    ClosedTabs, PositionedRecord, RestoreFlags, RestoreReport, SessionSource, SessionTarget,
};
use tabhost_tabs::{EngineFactory, LocalTab, TabControl, TabKind, TabRouter, TabSlot, TabState, TabStrip};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

pub struct BrowserWindow {
    router: TabRouter,
    engines: EngineFactory,
    strip: AsyncMutex<TabStrip>,
    closed: Mutex<ClosedTabs>,
    session_file: Option<PathBuf>,
}

impl BrowserWindow {
    pub fn new(
        router: TabRouter,
        engines: EngineFactory,
        closed_capacity: usize,
        session_file: Option<PathBuf>,
    ) -> Self {
        Self {
            router,
            engines,
            strip: AsyncMutex::new(TabStrip::new()),
            closed: Mutex::new(ClosedTabs::new(closed_capacity)),
            session_file,
        }
    }

    pub fn router(&self) -> &TabRouter {
        &self.router
    }

    pub async fn tab_count(&self) -> usize {
        self.strip.lock().await.len()
    }

    pub async fn tab(&self, socket_id: u64) -> Option<Arc<dyn TabControl>> {
        self.strip
            .lock()
            .await
            .find(socket_id)
            .map(|slot| slot.tab.clone())
    }

    pub async fn sockets(&self) -> Vec<u64> {
        self.strip.lock().await.iter().map(TabSlot::socket_id).collect()
    }

    // ===== Tabs =====

    /// Open a tab at the end of the strip. Remote tabs get a process of
    /// their own.
    pub async fn open_tab(&self, uri: Option<&str>, remote: bool) -> Result<u64, TabhostError> {
        let tab: Arc<dyn TabControl> = if remote {
            Arc::new(self.router.open_remote(None).await?)
        } else {
            Arc::new(self.local_tab())
        };
        if let Some(uri) = uri {
            tab.load_uri(uri);
        }
        let socket_id = tab.socket_id();
        self.strip.lock().await.push(tab, TabState::Normal)?;
        debug!(socket_id, remote, "tab opened");
        Ok(socket_id)
    }

    /// New tab with the back history of `socket_id`, on the same process.
    pub async fn duplicate_tab(&self, socket_id: u64) -> Result<Option<u64>, TabhostError> {
        let mut strip = self.strip.lock().await;
        let Some(position) = strip.position_of(socket_id) else {
            return Ok(None);
        };
        let Some(source) = strip.get(position).cloned() else {
            return Ok(None);
        };
        let history = source.tab.get_back_history().await?;

        let copy: Arc<dyn TabControl> = match source.tab.kind() {
            TabKind::Remote => Arc::new(self.router.open_remote(source.tab.process_id()).await?),
            TabKind::Local => Arc::new(self.local_tab()),
        };
        copy.set_history(&history);
        let copy_id = copy.socket_id();
        strip.insert(position + 1, copy, source.state)?;
        Ok(Some(copy_id))
    }

    /// Close the tab and remember it for [`reopen_closed`](Self::reopen_closed).
    pub async fn close_tab(&self, socket_id: u64) -> bool {
        let mut strip = self.strip.lock().await;
        let Some(position) = strip.position_of(socket_id) else {
            return false;
        };
        if let Some(slot) = strip.get(position) {
            if let Some(closed) = ClosedTab::capture(position, slot).await {
                lock(&self.closed).record_closed(closed);
            }
        }
        let Some((_, slot)) = strip.remove(socket_id) else {
            return false;
        };
        drop(strip);

        if slot.tab.kind() == TabKind::Remote {
            self.router.close(socket_id).await;
        } else {
            slot.tab.close().await;
        }
        true
    }

    /// Reopen the most recently closed tab at its old position.
    pub async fn reopen_closed(&self) -> Result<Option<u64>, TabhostError> {
        let Some(closed) = lock(&self.closed).reopen(0) else {
            return Ok(None);
        };
        let tab: Arc<dyn TabControl> = match closed.record.process_id {
            Some(process_id) => Arc::new(self.router.open_remote(Some(process_id)).await?),
            None => Arc::new(self.local_tab()),
        };
        tab.set_history(&closed.record.history);
        let socket_id = tab.socket_id();
        self.strip
            .lock()
            .await
            .insert(closed.index, tab, closed.record.state)?;
        info!(socket_id, uri = %closed.uri, "closed tab reopened");
        Ok(Some(socket_id))
    }

    pub fn closed_tabs(&self) -> Vec<ClosedTab> {
        lock(&self.closed).iter().cloned().collect()
    }

    // ===== Clipboard =====

    /// Session-format payload for the given tabs, in strip order.
    pub async fn copy_tabs(&self, sockets: &[u64]) -> Result<String, TabhostError> {
        let slots: Vec<TabSlot> = self
            .strip
            .lock()
            .await
            .iter()
            .filter(|slot| sockets.contains(&slot.socket_id()))
            .cloned()
            .collect();
        Ok(encode_session(&capture_slots(&slots).await)?)
    }

    /// Append the tabs of a copied payload, keeping their relative order.
    pub async fn paste_tabs(&self, payload: &str) -> Result<RestoreReport, TabhostError> {
        let offset = self.tab_count().await;
        let records: Vec<PositionedRecord> = decode_session(payload)?
            .into_iter()
            .map(|mut positioned| {
                positioned.index += offset;
                positioned
            })
            .collect();
        self.restore_records(&records, RestoreFlags::default()).await
    }

    // ===== Session =====

    pub async fn restore_session(&self, flags: RestoreFlags) -> Result<RestoreReport, TabhostError> {
        let Some(path) = &self.session_file else {
            return Ok(RestoreReport::default());
        };
        let records = load(SessionSource::File(path))?;
        self.restore_records(&records, flags).await
    }

    /// Returns how many tabs were written.
    pub async fn save_session(&self) -> Result<usize, TabhostError> {
        let Some(path) = &self.session_file else {
            return Ok(0);
        };
        let records = {
            let strip = self.strip.lock().await;
            capture(&strip).await
        };
        save(&records, SessionTarget::File(path))?;
        Ok(records.len())
    }

    async fn restore_records(
        &self,
        records: &[PositionedRecord],
        flags: RestoreFlags,
    ) -> Result<RestoreReport, TabhostError> {
        let mut strip = self.strip.lock().await;
        Ok(restore(records, flags, &self.router, &self.engines, &mut strip).await?)
    }

    fn local_tab(&self) -> LocalTab {
        LocalTab::new(next_socket_id(), (self.engines)(), self.router.events())
    }

    /// Stop every tab process. Tabs stay in the strip so a final save
    /// still has their cached state.
    pub async fn shutdown(&self) {
        self.router.supervisor().shutdown().await;
    }
}
