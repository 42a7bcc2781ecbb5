//! Owns the remote tabs of a window and moves them off dead processes.

use crate::control::TabControl;
use crate::events::TabEvent;
use crate::hub::NotificationHub;
use crate::remote::RemoteTabProxy;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tabhost_common::sync::lock;
use tabhost_common::{next_socket_id, EventBus, TabError};
use tabhost_supervisor::{ProcessSupervisor, SupervisorEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct RouterInner {
    supervisor: ProcessSupervisor,
    hub: NotificationHub,
    events: EventBus<TabEvent>,
    tabs: Mutex<BTreeMap<u64, RemoteTabProxy>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}

#[derive(Clone)]
pub struct TabRouter {
    inner: Arc<RouterInner>,
}

impl TabRouter {
    /// Must be called inside a tokio runtime.
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        let deaths = supervisor.subscribe();
        let hub = NotificationHub::new(supervisor.channel().clone());
        let router = Self {
            inner: Arc::new(RouterInner {
                supervisor,
                hub,
                events: EventBus::new(1024),
                tabs: Mutex::new(BTreeMap::new()),
                watcher: Mutex::new(None),
            }),
        };
        let watcher = tokio::spawn(watch_deaths(Arc::downgrade(&router.inner), deaths));
        *lock(&router.inner.watcher) = Some(watcher);
        router
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    /// The bus every tab of this window publishes on.
    pub fn events(&self) -> EventBus<TabEvent> {
        self.inner.events.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TabEvent> {
        self.inner.events.subscribe()
    }

    /// Open a remote tab on a fresh socket. See [`open_remote_on`](Self::open_remote_on).
    pub async fn open_remote(&self, requested: Option<u32>) -> Result<RemoteTabProxy, TabError> {
        self.open_remote_on(next_socket_id(), requested).await
    }

    /// Register a proxy for `socket_id` and bind it to `requested` (or a
    /// new process). A tab whose process cannot be started is returned in
    /// the `Failed` phase rather than as an error.
    pub async fn open_remote_on(
        &self,
        socket_id: u64,
        requested: Option<u32>,
    ) -> Result<RemoteTabProxy, TabError> {
        let proxy = RemoteTabProxy::new(
            socket_id,
            self.inner.supervisor.clone(),
            self.inner.hub.clone(),
            self.inner.events.clone(),
        );
        self.register(proxy.clone())?;
        if let Err(e) = proxy.attach(requested).await {
            warn!(socket_id, error = %e, "remote tab opened without a process");
        }
        Ok(proxy)
    }

    pub fn register(&self, proxy: RemoteTabProxy) -> Result<(), TabError> {
        let socket_id = proxy.socket_id();
        let mut tabs = lock(&self.inner.tabs);
        if tabs.contains_key(&socket_id) {
            return Err(TabError::DuplicateSocket(socket_id));
        }
        tabs.insert(socket_id, proxy);
        Ok(())
    }

    pub fn get(&self, socket_id: u64) -> Option<RemoteTabProxy> {
        lock(&self.inner.tabs).get(&socket_id).cloned()
    }

    pub fn remove(&self, socket_id: u64) -> Option<RemoteTabProxy> {
        lock(&self.inner.tabs).remove(&socket_id)
    }

    /// Close and forget the tab.
    pub async fn close(&self, socket_id: u64) -> bool {
        match self.remove(socket_id) {
            Some(proxy) => {
                proxy.close().await;
                true
            }
            None => false,
        }
    }

    pub fn tabs(&self) -> Vec<RemoteTabProxy> {
        lock(&self.inner.tabs).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.tabs).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.tabs).is_empty()
    }
}

async fn watch_deaths(
    inner: Weak<RouterInner>,
    mut deaths: tokio::sync::broadcast::Receiver<SupervisorEvent>,
) {
    loop {
        let event = match deaths.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "router missed supervisor events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        let Some(router) = inner.upgrade() else {
            return;
        };
        let (process_id, sockets) = match event {
            SupervisorEvent::ProcessDied { process_id, sockets } => (process_id, sockets),
            SupervisorEvent::ProcessReleased { process_id } => {
                router.hub.forget(process_id);
                continue;
            }
            _ => continue,
        };
        let proxies: Vec<RemoteTabProxy> = {
            let tabs = lock(&router.tabs);
            sockets.iter().filter_map(|s| tabs.get(s).cloned()).collect()
        };
        let hub = router.hub.clone();
        drop(router);

        tokio::spawn(async move {
            let results = join_all(proxies.iter().map(|proxy| proxy.reconnect(process_id))).await;
            let rebound = results.iter().filter(|r| r.is_ok()).count();
            info!(
                process_id,
                rebound,
                failed = results.len() - rebound,
                "tabs moved off dead process"
            );
            hub.forget(process_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::FindRequest;
    use crate::engine::headless_factory;
    use crate::host::InProcessSpawner;
    use crate::remote::ProxyPhase;
    use std::time::Duration;
    use tabhost_common::encode_main_interface;
    use tabhost_history::{HistoryEntry, HistoryItem, HistoryRecord};
    use tabhost_ipc::{ChannelOptions, MessageChannel};
    use serde_json::Value;
    use tabhost_common::{encode_tab_interface, NamespaceToken, SupervisorError};
    use tabhost_ipc::{protocol, Frame, PROCESS_READY};
    use tabhost_supervisor::{ProcessState, SpawnedProcess, Spawner};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;

    const MAIN_PID: u32 = 1;

    fn router_with(spawner: Arc<dyn Spawner>) -> TabRouter {
        let channel = MessageChannel::new(
            encode_main_interface(MAIN_PID),
            ChannelOptions {
                query_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        TabRouter::new(ProcessSupervisor::new(spawner, channel, Duration::from_secs(1)))
    }

    fn setup() -> (TabRouter, Arc<InProcessSpawner>) {
        let spawner = Arc::new(InProcessSpawner::starting_at(headless_factory(), 500));
        (router_with(spawner.clone()), spawner)
    }

    /// Poll until `f` holds or a second passes.
    async fn eventually<F: Fn() -> bool>(f: F) {
        for _ in 0..100 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn wait_for(rx: &mut tokio::sync::broadcast::Receiver<TabEvent>, want: impl Fn(&TabEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if want(&rx.recv().await.unwrap()) {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn remote_tab_navigates() {
        let (router, _spawner) = setup();
        let tab = router.open_remote(None).await.unwrap();
        assert_eq!(tab.phase(), ProxyPhase::Bound);
        assert_eq!(tab.process_id(), Some(500));

        tab.load_uri("https://a");
        tab.load_uri("https://b");
        assert!(tab.can_go_back().await.unwrap());
        assert_eq!(tab.get_current_item().await.unwrap(), HistoryItem::new("https://b", 0));
        assert_eq!(tab.find(FindRequest::new("b")).await.unwrap(), 2);

        let cached = tab.clone();
        eventually(move || cached.uri() == "https://b" && cached.title() == "https://b").await;
    }

    #[tokio::test]
    async fn tabs_share_a_requested_process() {
        let (router, spawner) = setup();
        let first = router.open_remote(None).await.unwrap();
        let second = router.open_remote(first.process_id()).await.unwrap();
        assert_eq!(second.process_id(), Some(500));
        assert_eq!(spawner.running(), vec![500]);
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn crash_moves_all_tabs_to_one_replacement() {
        let (router, spawner) = setup();
        let mut events = router.subscribe();
        let mut tabs = Vec::new();
        let first = router.open_remote(None).await.unwrap();
        tabs.push(first.clone());
        for _ in 0..3 {
            tabs.push(router.open_remote(Some(500)).await.unwrap());
        }
        first.load_uri("https://kept");
        let cached = first.clone();
        eventually(move || cached.uri() == "https://kept").await;

        spawner.kill(500);
        for _ in 0..tabs.len() {
            wait_for(&mut events, |e| matches!(e, TabEvent::Rebound { process_id: 501, .. })).await;
        }

        assert_eq!(spawner.running(), vec![501]);
        for tab in &tabs {
            assert_eq!(tab.phase(), ProxyPhase::Bound);
            assert_eq!(tab.process_id(), Some(501));
        }
        let history = first.get_history(None).await.unwrap();
        assert_eq!(history.current_entry().uri, "https://kept");

        let supervisor = router.supervisor();
        assert_ne!(supervisor.process_state(500).await, Some(ProcessState::Alive));
        assert!(!supervisor.channel().is_available(500));
        assert!(supervisor.died_map().await.is_empty());
    }

    #[tokio::test]
    async fn load_while_reconnecting_is_replayed() {
        let (router, spawner) = setup();
        let tab = router.open_remote(None).await.unwrap();
        let mut events = router.subscribe();

        spawner.kill(500);
        wait_for(&mut events, |e| matches!(e, TabEvent::Reconnecting { .. })).await;
        tab.load_uri("https://after-crash");
        wait_for(&mut events, |e| matches!(e, TabEvent::Rebound { .. })).await;

        assert_eq!(tab.pending_load(), None);
        let current = tab.get_current_item().await.unwrap();
        assert_eq!(current.uri, "https://after-crash");
    }

    #[tokio::test]
    async fn history_restored_after_crash() {
        let (router, spawner) = setup();
        let tab = router.open_remote(None).await.unwrap();
        let record = HistoryRecord::new(
            -1,
            vec![
                HistoryEntry::new("A", "https://a"),
                HistoryEntry::new("B", "https://b"),
            ],
        );
        tab.set_history(&record);
        assert_eq!(tab.get_history(None).await.unwrap(), record);

        let mut events = router.subscribe();
        spawner.kill(500);
        wait_for(&mut events, |e| matches!(e, TabEvent::Rebound { .. })).await;
        assert_eq!(tab.get_history(None).await.unwrap(), record);
        assert!(tab.can_go_forward().await.unwrap());
    }

    struct FailAfter {
        inner: InProcessSpawner,
        remaining: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Spawner for FailAfter {
        async fn spawn(
            &self,
            main_namespace: &tabhost_common::NamespaceToken,
        ) -> Result<tabhost_supervisor::SpawnedProcess, tabhost_common::SupervisorError> {
            use std::sync::atomic::Ordering;
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 0 {
                self.remaining.store(0, Ordering::SeqCst);
                return Err(tabhost_common::SupervisorError::SpawnFailure("exec format error".into()));
            }
            self.inner.spawn(main_namespace).await
        }
    }

    #[tokio::test]
    async fn failed_respawn_leaves_tabs_failed() {
        let spawner = Arc::new(FailAfter {
            inner: InProcessSpawner::starting_at(headless_factory(), 500),
            remaining: std::sync::atomic::AtomicUsize::new(1),
        });
        let router = router_with(spawner.clone());
        let mut failures = router.supervisor().subscribe();
        let mut events = router.subscribe();

        let first = router.open_remote(None).await.unwrap();
        let second = router.open_remote(Some(500)).await.unwrap();
        first.load_uri("https://a");

        spawner.inner.kill(500);
        for _ in 0..2 {
            wait_for(&mut events, |e| matches!(e, TabEvent::Failed { .. })).await;
        }
        assert_eq!(first.phase(), ProxyPhase::Failed);
        assert_eq!(second.phase(), ProxyPhase::Failed);
        assert!(matches!(
            second.can_go_back().await,
            Err(TabError::Supervisor(_))
        ));

        let mut reported = 0;
        while let Ok(event) = failures.try_recv() {
            if matches!(event, SupervisorEvent::RespawnFailed { .. }) {
                reported += 1;
            }
        }
        assert_eq!(reported, 1);
    }

    #[tokio::test]
    async fn close_releases_last_process() {
        let (router, spawner) = setup();
        let first = router.open_remote(None).await.unwrap();
        let second = router.open_remote(Some(500)).await.unwrap();

        assert!(router.close(first.socket_id()).await);
        assert!(first.is_closed());
        assert_eq!(first.can_go_back().await, Err(TabError::Closed));
        assert_eq!(spawner.running(), vec![500]);

        assert!(router.close(second.socket_id()).await);
        let spawner_view = spawner.clone();
        eventually(move || spawner_view.running().is_empty()).await;
        assert!(!router.supervisor().channel().is_available(500));
        assert!(!router.close(second.socket_id()).await);
    }

    #[tokio::test]
    async fn released_process_is_dropped_from_hub() {
        let (router, _spawner) = setup();
        let tab = router.open_remote(None).await.unwrap();
        let hub = router.inner.hub.clone();
        assert!(hub.is_installed(500));
        assert_eq!(hub.route_count(), 1);

        assert!(router.close(tab.socket_id()).await);
        let view = hub.clone();
        eventually(move || !view.is_installed(500)).await;
        assert_eq!(hub.route_count(), 0);
    }

    const SILENT_PID: u32 = 900;

    /// A child that reports ready and never answers on its own. Each query
    /// it reads is passed to `seen`; a reply is written for every
    /// correlation sent on `replies`.
    struct SilentSpawner {
        seen: mpsc::UnboundedSender<u64>,
        replies: Mutex<Option<mpsc::UnboundedReceiver<u64>>>,
    }

    async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> bool {
        let mut line = protocol::encode(frame).unwrap();
        line.push('\n');
        writer.write_all(line.as_bytes()).await.is_ok()
    }

    #[async_trait::async_trait]
    impl Spawner for SilentSpawner {
        async fn spawn(&self, _main: &NamespaceToken) -> Result<SpawnedProcess, SupervisorError> {
            let mut replies = lock(&self.replies)
                .take()
                .ok_or_else(|| SupervisorError::SpawnFailure("already spawned".into()))?;
            let seen = self.seen.clone();
            let (main_end, child_end) = tokio::io::duplex(64 * 1024);
            let (child_read, mut child_write) = tokio::io::split(child_end);

            tokio::spawn(async move {
                let ready = Frame::Command {
                    namespace: encode_tab_interface(SILENT_PID),
                    socket_id: None,
                    method: PROCESS_READY.into(),
                    args: Value::Null,
                };
                if !write_frame(&mut child_write, &ready).await {
                    return;
                }
                let mut lines = BufReader::new(child_read).lines();
                loop {
                    tokio::select! {
                        read = lines.next_line() => match read {
                            Ok(Some(line)) => {
                                if let Ok(Frame::Query { correlation, .. }) = protocol::decode(&line) {
                                    let _ = seen.send(correlation);
                                }
                            }
                            _ => return,
                        },
                        Some(correlation) = replies.recv() => {
                            let late = Frame::reply(correlation, Ok(Value::from(7)));
                            if !write_frame(&mut child_write, &late).await {
                                return;
                            }
                        }
                    }
                }
            });

            let (main_read, main_write) = tokio::io::split(main_end);
            Ok(SpawnedProcess {
                process_id: SILENT_PID,
                stdout: Box::new(main_read),
                stdin: Box::new(main_write),
                child: None,
            })
        }
    }

    #[tokio::test]
    async fn close_cancels_query_in_flight() {
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let router = router_with(Arc::new(SilentSpawner {
            seen: seen_tx,
            replies: Mutex::new(Some(reply_rx)),
        }));
        let tab = router.open_remote(None).await.unwrap();
        let neighbour = router.open_remote(Some(SILENT_PID)).await.unwrap();
        assert_eq!(tab.process_id(), Some(SILENT_PID));

        let asking = tab.clone();
        let pending = tokio::spawn(async move { asking.find(FindRequest::new("x")).await });
        let correlation = tokio::time::timeout(Duration::from_secs(1), seen.recv())
            .await
            .unwrap()
            .unwrap();

        tab.close().await;
        assert_eq!(pending.await.unwrap(), Err(TabError::Closed));
        let channel = router.supervisor().channel().clone();
        assert_eq!(channel.pending_queries(), 0);

        // The reply that finally arrives belongs to nobody and is dropped.
        reply_tx.send(correlation).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.is_available(SILENT_PID));
        assert_eq!(channel.pending_queries(), 0);
        assert_eq!(neighbour.phase(), ProxyPhase::Bound);
    }

    #[tokio::test]
    async fn commands_after_close_are_noops() {
        let (router, _spawner) = setup();
        let tab = router.open_remote(None).await.unwrap();
        tab.close().await;
        tab.load_uri("https://ignored");
        assert_eq!(tab.pending_load(), None);
        assert_eq!(tab.get_history(None).await, Err(TabError::Closed));
    }

    #[tokio::test]
    async fn duplicate_socket_rejected() {
        let (router, _spawner) = setup();
        let tab = router.open_remote_on(77, None).await.unwrap();
        assert_eq!(
            router.open_remote_on(77, None).await.err(),
            Some(TabError::DuplicateSocket(77))
        );
        assert_eq!(router.get(77).map(|t| t.socket_id()), Some(tab.socket_id()));
    }
}
