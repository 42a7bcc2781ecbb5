//! Tab-process side: serves engines for every socket bound to this process.
//!
//! Requests arrive under the window's namespace. After each request the
//! engine's status is diffed and changes are sent back as notifications.
//! The process stops once its last tab exits or the window goes away.

use crate::engine::{EngineFactory, EngineStatus, TabEngine};
use crate::wire::{LogMessage, TabNotification, TabRequest, LOG_MESSAGE};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tabhost_common::sync::lock;
use tabhost_common::{
    encode_main_interface, encode_tab_interface, ChannelError, Identity, NamespaceToken,
    SupervisorError,
};
use tabhost_history::{from_value, to_value, HistoryRecord};
use tabhost_ipc::{ChannelOptions, Inbound, LinkEvent, MessageChannel};
use tabhost_supervisor::{SpawnedProcess, Spawner};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct HostedTab {
    engine: Box<dyn TabEngine>,
    reported: EngineStatus,
    history: HistoryRecord,
}

impl HostedTab {
    fn new(engine: Box<dyn TabEngine>) -> Self {
        let reported = engine.status();
        let history = engine.history().snapshot(None);
        Self {
            engine,
            reported,
            history,
        }
    }

    /// Notifications for everything that changed since the last call.
    fn drain_changes(&mut self) -> Vec<TabNotification> {
        let status = self.engine.status();
        let mut changes = status.changes_since(&self.reported);
        self.reported = status;

        let history = self.engine.history().snapshot(None);
        if history != self.history {
            changes.push(TabNotification::History {
                history: to_value(&history, None),
            });
            self.history = history;
        }
        changes
    }
}

struct HostInner {
    channel: MessageChannel,
    main_process: u32,
    factory: EngineFactory,
    tabs: Mutex<BTreeMap<u64, HostedTab>>,
    exit: Notify,
}

#[derive(Clone)]
pub struct TabHost {
    inner: Arc<HostInner>,
}

impl TabHost {
    /// `channel` must already be attached to `main_process`.
    pub fn new(channel: MessageChannel, main_process: u32, factory: EngineFactory) -> Self {
        Self {
            inner: Arc::new(HostInner {
                channel,
                main_process,
                factory,
                tabs: Mutex::new(BTreeMap::new()),
                exit: Notify::new(),
            }),
        }
    }

    /// Register request handlers and tell the window we are ready.
    pub fn start(&self) -> Result<(), ChannelError> {
        let namespace = encode_main_interface(self.inner.main_process);
        for method in TabRequest::METHODS {
            let host: Weak<HostInner> = Arc::downgrade(&self.inner);
            self.inner
                .channel
                .register_handler(&namespace, method, move |inbound| match host.upgrade() {
                    Some(host) => host.handle(inbound),
                    None => Err("tab process shutting down".to_string()),
                })?;
        }
        self.inner.channel.announce_ready(self.inner.main_process);
        info!(main_process = self.inner.main_process, "tab host ready");
        Ok(())
    }

    pub fn tab_count(&self) -> usize {
        lock(&self.inner.tabs).len()
    }

    /// Forward a diagnostic line to the window's log.
    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.inner.relay_log(level, message.into());
    }

    /// Serve until the last tab exits or the window link closes.
    pub async fn run(&self) {
        let main = self.inner.main_process;
        let mut links = self.inner.channel.subscribe();
        if !self.inner.channel.is_available(main) {
            return;
        }
        loop {
            tokio::select! {
                _ = self.inner.exit.notified() => {
                    info!("last tab closed");
                    break;
                }
                event = links.recv() => match event {
                    Ok(LinkEvent::Disconnected { process_id } | LinkEvent::Lost { process_id })
                        if process_id == main =>
                    {
                        info!(main_process = main, "window went away");
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}

impl HostInner {
    fn relay_log(&self, level: &str, message: String) {
        let log = LogMessage {
            level: level.to_string(),
            message,
        };
        let args = serde_json::to_value(log).unwrap_or(Value::Null);
        self.channel
            .send_process_command(self.main_process, LOG_MESSAGE, args);
    }

    fn handle(&self, inbound: Inbound) -> Result<Value, String> {
        let socket_id = inbound
            .socket_id
            .ok_or_else(|| format!("{} needs a socket", inbound.method))?;
        let request = TabRequest::parse(&inbound.method, inbound.args)?;

        let mut tabs = lock(&self.tabs);
        match request {
            TabRequest::SetSocketId => {
                tabs.entry(socket_id).or_insert_with(|| {
                    debug!(socket_id, "creating engine");
                    HostedTab::new((self.factory)())
                });
                Ok(Value::Null)
            }
            TabRequest::Exit => {
                let removed = tabs.remove(&socket_id).is_some();
                let empty = tabs.is_empty();
                drop(tabs);
                if removed {
                    debug!(socket_id, "engine closed");
                    if empty {
                        self.exit.notify_one();
                    }
                }
                Ok(Value::Null)
            }
            request => {
                let Some(tab) = tabs.get_mut(&socket_id) else {
                    drop(tabs);
                    let message = format!("no tab {socket_id} in this process");
                    self.relay_log("warn", message.clone());
                    return Err(message);
                };
                let reply = apply(tab.engine.as_mut(), request)?;
                let changes = tab.drain_changes();
                drop(tabs);

                let identity = Identity::new(self.main_process, socket_id);
                for change in changes {
                    self.channel
                        .send_command(identity, change.method(), change.args());
                }
                Ok(reply)
            }
        }
    }
}

fn apply(engine: &mut dyn TabEngine, request: TabRequest) -> Result<Value, String> {
    let reply = match request {
        TabRequest::SetSocketId | TabRequest::Exit => Value::Null,
        TabRequest::LoadUri { uri } => {
            engine.load_uri(&uri);
            Value::Null
        }
        TabRequest::GoBack => {
            engine.go_back();
            Value::Null
        }
        TabRequest::GoForward => {
            engine.go_forward();
            Value::Null
        }
        TabRequest::GoToHistoryItem { offset } => {
            engine.go_to_history_item(offset);
            Value::Null
        }
        TabRequest::StopLoading => {
            engine.stop_loading();
            Value::Null
        }
        TabRequest::Reload => {
            engine.reload();
            Value::Null
        }
        TabRequest::Zoom { direction } => {
            engine.zoom(direction);
            Value::Null
        }
        TabRequest::PrintPage => {
            engine.print_page();
            Value::Null
        }
        TabRequest::SetHighlight(request) => {
            engine.set_highlight(&request);
            Value::Null
        }
        TabRequest::SetHistory { history } => {
            let record = from_value(&history).map_err(|e| e.to_string())?;
            engine.set_history(&record);
            Value::Null
        }
        TabRequest::Find(request) => Value::from(engine.find(&request)),
        TabRequest::GetHistory { index, back_only } => {
            let record = if back_only {
                engine.history().snapshot_back_only()
            } else {
                engine.history().snapshot(index)
            };
            to_value(&record, None)
        }
        TabRequest::GetCurrentItem => json(engine.history().current_item())?,
        TabRequest::GetBackItem => json(engine.history().back_item())?,
        TabRequest::GetForwardItem => json(engine.history().forward_item())?,
        TabRequest::CanGoBack => Value::Bool(engine.history().can_go_back()),
        TabRequest::CanGoForward => Value::Bool(engine.history().can_go_forward()),
    };
    Ok(reply)
}

fn json<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

// =============================================================================
// IN-PROCESS SPAWNER
// =============================================================================

struct RunningHost {
    channel: MessageChannel,
    main_process: u32,
    task: JoinHandle<()>,
}

/// Runs tab hosts as tasks over in-memory pipes, handing out synthetic
/// process ids.
pub struct InProcessSpawner {
    factory: EngineFactory,
    options: ChannelOptions,
    next_pid: AtomicU32,
    hosts: Arc<Mutex<HashMap<u32, RunningHost>>>,
}

impl InProcessSpawner {
    pub const FIRST_PID: u32 = 10_000;

    pub fn new(factory: EngineFactory) -> Self {
        Self::starting_at(factory, Self::FIRST_PID)
    }

    pub fn starting_at(factory: EngineFactory, first_pid: u32) -> Self {
        Self {
            factory,
            options: ChannelOptions::default(),
            next_pid: AtomicU32::new(first_pid),
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pids whose host is still serving.
    pub fn running(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = lock(&self.hosts)
            .iter()
            .filter(|(_, host)| !host.task.is_finished())
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Simulate a crash: stop the host and drop its pipe.
    pub fn kill(&self, process_id: u32) -> bool {
        let Some(host) = lock(&self.hosts).remove(&process_id) else {
            return false;
        };
        host.task.abort();
        host.channel.detach(host.main_process);
        info!(process_id, "in-process tab host killed");
        true
    }
}

#[async_trait]
impl Spawner for InProcessSpawner {
    async fn spawn(
        &self,
        main_namespace: &NamespaceToken,
    ) -> Result<SpawnedProcess, SupervisorError> {
        let main_process = main_namespace.process_id().ok_or_else(|| {
            SupervisorError::SpawnFailure(format!("bad window namespace {main_namespace}"))
        })?;
        let process_id = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let (window_end, host_end) = tokio::io::duplex(256 * 1024);
        let (host_read, host_write) = tokio::io::split(host_end);
        let channel = MessageChannel::new(encode_tab_interface(process_id), self.options.clone());
        channel.attach(main_process, host_read, host_write);

        let host = TabHost::new(channel.clone(), main_process, self.factory.clone());
        host.start()
            .map_err(|e| SupervisorError::SpawnFailure(e.to_string()))?;

        let hosts = Arc::downgrade(&self.hosts);
        let link = channel.clone();
        let task = tokio::spawn(async move {
            host.run().await;
            link.detach(main_process);
            if let Some(hosts) = hosts.upgrade() {
                lock(&hosts).remove(&process_id);
            }
        });
        lock(&self.hosts).insert(
            process_id,
            RunningHost {
                channel,
                main_process,
                task,
            },
        );

        let (window_read, window_write) = tokio::io::split(window_end);
        Ok(SpawnedProcess {
            process_id,
            stdout: Box::new(window_read),
            stdin: Box::new(window_write),
            child: None,
        })
    }
}
