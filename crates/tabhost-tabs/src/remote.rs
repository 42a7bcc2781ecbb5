//! Window-side proxy for a tab whose engine runs in a tab process.
//!
//! Phases: `Unbound -> Bound <-> Reconnecting`, with `Failed` when no
//! replacement process can be started and `Closed` once the user closes
//! the tab. While not bound only the latest `load_uri` is kept; every
//! other command is dropped. Title, uri and history are cached from
//! notifications so the tab stays presentable and restorable while its
//! process is gone.

use crate::control::{FindRequest, HighlightRequest, TabControl, TabKind, ZoomDirection};
use crate::engine::EngineStatus;
use crate::events::TabEvent;
use crate::hub::NotificationHub;
use crate::wire::{TabNotification, TabRequest};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tabhost_common::sync::lock;
use tabhost_common::{ChannelError, EventBus, Identity, SupervisorError, TabError};
use tabhost_history::{from_value, to_value, HistoryItem, HistoryRecord};
use tabhost_ipc::MessageChannel;
use tabhost_supervisor::ProcessSupervisor;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPhase {
    Unbound,
    Bound,
    Reconnecting,
    Failed,
    Closed,
}

struct ProxyState {
    phase: ProxyPhase,
    process_id: Option<u32>,
    pending_load: Option<String>,
    history: HistoryRecord,
    status: EngineStatus,
    failure: Option<String>,
}

pub(crate) struct ProxyInner {
    socket_id: u64,
    state: Mutex<ProxyState>,
    supervisor: ProcessSupervisor,
    hub: NotificationHub,
    events: EventBus<TabEvent>,
    /// Serializes bind, reconnect and close.
    transition: tokio::sync::Mutex<()>,
}

impl ProxyInner {
    /// Apply a notification from `process_id`. Ignored unless the tab is
    /// currently bound to that process.
    pub(crate) fn apply(&self, process_id: u32, notification: TabNotification) {
        {
            let mut state = lock(&self.state);
            if state.process_id != Some(process_id) || state.phase == ProxyPhase::Closed {
                return;
            }
            match &notification {
                TabNotification::Title { title } => state.status.title = title.clone(),
                TabNotification::Uri { uri } => state.status.uri = uri.clone(),
                TabNotification::Progress { progress } => state.status.progress = *progress,
                TabNotification::BackForward {
                    can_go_back,
                    can_go_forward,
                } => {
                    state.status.can_go_back = *can_go_back;
                    state.status.can_go_forward = *can_go_forward;
                }
                TabNotification::History { history } => match from_value(history) {
                    Ok(record) => state.history = record,
                    Err(e) => warn!(socket_id = self.socket_id, error = %e, "bad history notification"),
                },
                _ => {}
            }
        }
        if let Some(event) = TabEvent::from_notification(self.socket_id, &notification) {
            self.events.publish(event);
        }
    }
}

#[derive(Clone)]
pub struct RemoteTabProxy {
    inner: Arc<ProxyInner>,
}

impl RemoteTabProxy {
    /// A proxy in the `Unbound` phase. Call [`attach`](Self::attach) to
    /// give it a process.
    pub fn new(
        socket_id: u64,
        supervisor: ProcessSupervisor,
        hub: NotificationHub,
        events: EventBus<TabEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                socket_id,
                state: Mutex::new(ProxyState {
                    phase: ProxyPhase::Unbound,
                    process_id: None,
                    pending_load: None,
                    history: HistoryRecord::default(),
                    status: EngineStatus::default(),
                    failure: None,
                }),
                supervisor,
                hub,
                events,
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn phase(&self) -> ProxyPhase {
        lock(&self.inner.state).phase
    }

    /// The uri that will be loaded once the tab is bound again.
    pub fn pending_load(&self) -> Option<String> {
        lock(&self.inner.state).pending_load.clone()
    }

    pub fn failure(&self) -> Option<String> {
        lock(&self.inner.state).failure.clone()
    }

    fn channel(&self) -> &MessageChannel {
        self.inner.supervisor.channel()
    }

    // ===== Binding =====

    /// Bind to `requested` (or a fresh process). Old pids resolve through
    /// the supervisor's respawn map.
    pub async fn attach(&self, requested: Option<u32>) -> Result<u32, TabError> {
        let _transition = self.inner.transition.lock().await;
        if self.is_closed() {
            return Err(TabError::Closed);
        }
        match self.inner.supervisor.attach_or_spawn(requested).await {
            Ok(process_id) => {
                self.bind_to(process_id).await?;
                Ok(process_id)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e.into())
            }
        }
    }

    /// Move the tab off `dead` onto its replacement. Concurrent calls for
    /// one death are serialized; later ones find the tab already rebound.
    pub async fn reconnect(&self, dead: u32) -> Result<u32, TabError> {
        let _transition = self.inner.transition.lock().await;
        let announce = {
            let mut state = lock(&self.inner.state);
            match (state.phase, state.process_id) {
                (ProxyPhase::Closed, _) => return Err(TabError::Closed),
                (ProxyPhase::Failed, _) => return Err(failure_error(&state)),
                (ProxyPhase::Bound, Some(current)) if current != dead => return Ok(current),
                _ => {}
            }
            let announce = state.phase != ProxyPhase::Reconnecting;
            state.phase = ProxyPhase::Reconnecting;
            announce
        };
        let socket_id = self.inner.socket_id;
        if announce {
            info!(socket_id, process_id = dead, "tab lost its process, reconnecting");
            self.inner.events.publish(TabEvent::Reconnecting {
                socket_id,
                process_id: dead,
            });
        }

        self.inner.hub.unroute(dead, socket_id);
        if !self.channel().is_available(dead) {
            self.inner.supervisor.notify_death(dead).await;
        }

        match self.inner.supervisor.attach_or_spawn(Some(dead)).await {
            Ok(process_id) => {
                self.bind_to(process_id).await?;
                self.inner.events.publish(TabEvent::Rebound {
                    socket_id,
                    process_id,
                });
                Ok(process_id)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e.into())
            }
        }
    }

    /// Start a reconnect in the background.
    fn begin_reconnect(&self, dead: u32) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(socket_id = self.inner.socket_id, "no runtime to reconnect on");
            return;
        };
        let proxy = self.clone();
        runtime.spawn(async move {
            if let Err(e) = proxy.reconnect(dead).await {
                debug!(socket_id = proxy.inner.socket_id, error = %e, "reconnect ended");
            }
        });
    }

    /// Re-establish the tab on `process_id`: engine, history, then the
    /// buffered load.
    async fn bind_to(&self, process_id: u32) -> Result<(), TabError> {
        let socket_id = self.inner.socket_id;
        self.inner.hub.install(process_id)?;
        self.inner
            .hub
            .route(process_id, socket_id, Arc::downgrade(&self.inner));
        self.inner.supervisor.bind(socket_id, process_id).await;

        let replay = {
            let mut state = lock(&self.inner.state);
            if state.phase == ProxyPhase::Closed {
                None
            } else {
                state.phase = ProxyPhase::Bound;
                state.process_id = Some(process_id);
                state.failure = None;
                Some((state.history.clone(), state.pending_load.take()))
            }
        };
        let Some((history, pending_load)) = replay else {
            self.inner.hub.unroute(process_id, socket_id);
            self.inner.supervisor.unbind(socket_id).await;
            return Err(TabError::Closed);
        };

        let identity = Identity::new(process_id, socket_id);
        self.send(identity, &TabRequest::SetSocketId);
        if !history.is_empty() {
            self.send(
                identity,
                &TabRequest::SetHistory {
                    history: to_value(&history, None),
                },
            );
        }
        if let Some(uri) = pending_load {
            self.send(identity, &TabRequest::LoadUri { uri });
        }
        self.inner.supervisor.confirm_bound(socket_id, process_id).await;
        debug!(socket_id, process_id, "tab bound");
        Ok(())
    }

    async fn fail(&self, error: &SupervisorError) {
        let socket_id = self.inner.socket_id;
        {
            let mut state = lock(&self.inner.state);
            if state.phase == ProxyPhase::Closed {
                return;
            }
            state.phase = ProxyPhase::Failed;
            state.failure = Some(error.to_string());
        }
        warn!(socket_id, error = %error, "tab has no process");
        self.inner.supervisor.unbind(socket_id).await;
        self.inner.events.publish(TabEvent::Failed {
            socket_id,
            reason: error.to_string(),
        });
    }

    // ===== Messaging =====

    fn send(&self, identity: Identity, request: &TabRequest) {
        self.channel()
            .send_command(identity, request.method(), request.args());
    }

    fn command(&self, request: TabRequest) {
        let socket_id = self.inner.socket_id;
        let target = {
            let mut state = lock(&self.inner.state);
            match (state.phase, state.process_id) {
                (ProxyPhase::Bound, Some(process_id)) => Some(process_id),
                (ProxyPhase::Unbound | ProxyPhase::Reconnecting, _) => {
                    if let TabRequest::LoadUri { uri } = &request {
                        state.pending_load = Some(uri.clone());
                    }
                    None
                }
                _ => None,
            }
        };
        let Some(process_id) = target else {
            debug!(socket_id, method = request.method(), "tab not bound, command not sent");
            return;
        };

        if self.channel().is_available(process_id) {
            self.send(Identity::new(process_id, socket_id), &request);
        } else {
            if let TabRequest::LoadUri { uri } = &request {
                lock(&self.inner.state).pending_load = Some(uri.clone());
            }
            self.begin_reconnect(process_id);
        }
    }

    async fn query(&self, request: TabRequest) -> Result<Value, TabError> {
        let process_id = {
            let state = lock(&self.inner.state);
            match (state.phase, state.process_id) {
                (ProxyPhase::Bound, Some(process_id)) => process_id,
                (ProxyPhase::Closed, _) => return Err(TabError::Closed),
                (ProxyPhase::Failed, _) => return Err(failure_error(&state)),
                _ => return Err(TabError::Reconnecting),
            }
        };
        let identity = Identity::new(process_id, self.inner.socket_id);
        match self
            .channel()
            .send_query(identity, request.method(), request.args())
            .await
        {
            Ok(value) => Ok(value),
            Err(ChannelError::PeerUnavailable { process_id }) => {
                self.begin_reconnect(process_id);
                Err(ChannelError::PeerUnavailable { process_id }.into())
            }
            Err(ChannelError::Cancelled) if self.is_closed() => Err(TabError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    async fn typed_query<T: DeserializeOwned>(&self, request: TabRequest) -> Result<T, TabError> {
        let method = request.method();
        let value = self.query(request).await?;
        serde_json::from_value(value).map_err(|e| TabError::BadReply(format!("{method}: {e}")))
    }

    fn cached_history(&self) -> HistoryRecord {
        lock(&self.inner.state).history.clone()
    }
}

fn failure_error(state: &ProxyState) -> TabError {
    TabError::Supervisor(SupervisorError::SpawnFailure(
        state
            .failure
            .clone()
            .unwrap_or_else(|| "no tab process".to_string()),
    ))
}

#[async_trait]
impl TabControl for RemoteTabProxy {
    fn socket_id(&self) -> u64 {
        self.inner.socket_id
    }

    fn process_id(&self) -> Option<u32> {
        lock(&self.inner.state).process_id
    }

    fn kind(&self) -> TabKind {
        TabKind::Remote
    }

    fn title(&self) -> String {
        lock(&self.inner.state).status.title.clone()
    }

    fn uri(&self) -> String {
        lock(&self.inner.state).status.uri.clone()
    }

    fn is_closed(&self) -> bool {
        self.phase() == ProxyPhase::Closed
    }

    fn load_uri(&self, uri: &str) {
        self.command(TabRequest::LoadUri {
            uri: uri.to_string(),
        });
    }

    fn go_back(&self) {
        self.command(TabRequest::GoBack);
    }

    fn go_forward(&self) {
        self.command(TabRequest::GoForward);
    }

    fn go_to_history_item(&self, offset: i64) {
        self.command(TabRequest::GoToHistoryItem { offset });
    }

    fn stop_loading(&self) {
        self.command(TabRequest::StopLoading);
    }

    fn reload(&self) {
        self.command(TabRequest::Reload);
    }

    fn zoom(&self, direction: ZoomDirection) {
        self.command(TabRequest::Zoom { direction });
    }

    fn print_page(&self) {
        self.command(TabRequest::PrintPage);
    }

    fn set_highlight(&self, request: HighlightRequest) {
        self.command(TabRequest::SetHighlight(request));
    }

    /// Cached immediately so a tab that is still binding restores it.
    fn set_history(&self, record: &HistoryRecord) {
        {
            let mut state = lock(&self.inner.state);
            if state.phase == ProxyPhase::Closed {
                return;
            }
            state.history = record.clone();
        }
        self.command(TabRequest::SetHistory {
            history: to_value(record, None),
        });
    }

    async fn find(&self, request: FindRequest) -> Result<u32, TabError> {
        self.typed_query(TabRequest::Find(request)).await
    }

    /// Falls back to the last known history while the process is gone.
    async fn get_history(&self, override_index: Option<i64>) -> Result<HistoryRecord, TabError> {
        let request = TabRequest::GetHistory {
            index: override_index,
            back_only: false,
        };
        match self.query(request).await {
            Ok(value) => {
                let record = from_value(&value)?;
                if override_index.is_none() {
                    lock(&self.inner.state).history = record.clone();
                }
                Ok(record)
            }
            Err(TabError::Closed) => Err(TabError::Closed),
            Err(e) => {
                debug!(socket_id = self.inner.socket_id, error = %e, "using cached history");
                let cached = self.cached_history();
                Ok(match override_index {
                    Some(index) => cached.with_current_index(index),
                    None => cached,
                })
            }
        }
    }

    async fn get_back_history(&self) -> Result<HistoryRecord, TabError> {
        let request = TabRequest::GetHistory {
            index: None,
            back_only: true,
        };
        match self.query(request).await {
            Ok(value) => Ok(from_value(&value)?),
            Err(TabError::Closed) => Err(TabError::Closed),
            Err(_) => Ok(self.cached_history().truncate_forward()),
        }
    }

    async fn get_current_item(&self) -> Result<HistoryItem, TabError> {
        self.typed_query(TabRequest::GetCurrentItem).await
    }

    async fn get_back_item(&self) -> Result<HistoryItem, TabError> {
        self.typed_query(TabRequest::GetBackItem).await
    }

    async fn get_forward_item(&self) -> Result<HistoryItem, TabError> {
        self.typed_query(TabRequest::GetForwardItem).await
    }

    async fn can_go_back(&self) -> Result<bool, TabError> {
        self.typed_query(TabRequest::CanGoBack).await
    }

    async fn can_go_forward(&self) -> Result<bool, TabError> {
        self.typed_query(TabRequest::CanGoForward).await
    }

    async fn close(&self) {
        let socket_id = self.inner.socket_id;
        {
            let mut state = lock(&self.inner.state);
            if state.phase == ProxyPhase::Closed {
                return;
            }
            state.phase = ProxyPhase::Closed;
            state.pending_load = None;
        }
        self.channel().cancel_socket(socket_id);

        let _transition = self.inner.transition.lock().await;
        let process_id = lock(&self.inner.state).process_id.take();
        if let Some(process_id) = process_id {
            self.send(Identity::new(process_id, socket_id), &TabRequest::Exit);
            self.inner.hub.unroute(process_id, socket_id);
        }
        self.inner.supervisor.unbind(socket_id).await;
        info!(socket_id, "tab closed");
        self.inner.events.publish(TabEvent::Closed { socket_id });
    }
}
