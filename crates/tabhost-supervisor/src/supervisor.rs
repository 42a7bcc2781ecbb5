//! Process supervisor: spawn, readiness, death, and respawn with pid
//! remapping.

use crate::spawner::Spawner;
use crate::state::{ProcessState, Resolution, SupervisorState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tabhost_common::sync::lock;
use tabhost_common::{EventBus, SupervisorError};
use tabhost_ipc::{LinkEvent, MessageChannel};
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    ProcessSpawned { process_id: u32 },
    ProcessAlive { process_id: u32 },
    /// `sockets` were bound to the process when it died.
    ProcessDied { process_id: u32, sockets: Vec<u64> },
    /// Published once per death episode.
    RespawnFailed { process_id: u32, reason: String },
    /// The last tab left a live process, which was then shut down.
    ProcessReleased { process_id: u32 },
}

struct SupervisorInner {
    state: tokio::sync::Mutex<SupervisorState>,
    spawner: Arc<dyn Spawner>,
    channel: MessageChannel,
    children: Mutex<HashMap<u32, Child>>,
    events: EventBus<SupervisorEvent>,
    ready_timeout: Duration,
    reap_grace: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SupervisorInner {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ProcessSupervisor {
    /// Must be called inside a tokio runtime: a task mapping channel link
    /// events to process deaths is started here.
    pub fn new(spawner: Arc<dyn Spawner>, channel: MessageChannel, ready_timeout: Duration) -> Self {
        Self::with_timeouts(spawner, channel, ready_timeout, DEFAULT_REAP_GRACE)
    }

    /// `reap_grace` is how long a released child may take to exit before
    /// it is killed.
    pub fn with_timeouts(
        spawner: Arc<dyn Spawner>,
        channel: MessageChannel,
        ready_timeout: Duration,
        reap_grace: Duration,
    ) -> Self {
        let links = channel.subscribe();
        let supervisor = Self {
            inner: Arc::new(SupervisorInner {
                state: tokio::sync::Mutex::new(SupervisorState::new()),
                spawner,
                channel,
                children: Mutex::new(HashMap::new()),
                events: EventBus::new(256),
                ready_timeout,
                reap_grace,
                watcher: Mutex::new(None),
            }),
        };
        let watcher = tokio::spawn(watch_links(Arc::downgrade(&supervisor.inner), links));
        *lock(&supervisor.inner.watcher) = Some(watcher);
        supervisor
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.inner.channel
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve `requested` to a live process, spawning one if needed.
    ///
    /// The whole call runs under the state lock, so every caller of one
    /// death episode after the first observes the populated `died_map`
    /// and no second process is spawned.
    pub async fn attach_or_spawn(&self, requested: Option<u32>) -> Result<u32, SupervisorError> {
        let mut state = self.inner.state.lock().await;
        match state.resolve(requested) {
            Resolution::Live(process_id) => {
                if requested != Some(process_id) {
                    debug!(?requested, process_id, "remapped to replacement process");
                }
                Ok(process_id)
            }
            Resolution::Failed { dead } => Err(SupervisorError::SpawnFailure(format!(
                "respawn for process {dead} already failed"
            ))),
            Resolution::Spawn { replacing } => match self.spawn_locked(&mut state, replacing).await {
                Ok(process_id) => Ok(process_id),
                Err(e) => {
                    if state.record_failure(replacing) {
                        if let Some(dead) = replacing {
                            error!(process_id = dead, error = %e, "respawn failed");
                            self.inner.events.publish(SupervisorEvent::RespawnFailed {
                                process_id: dead,
                                reason: e.to_string(),
                            });
                        }
                    }
                    Err(e)
                }
            },
        }
    }

    async fn spawn_locked(
        &self,
        state: &mut SupervisorState,
        replacing: Option<u32>,
    ) -> Result<u32, SupervisorError> {
        info!(?replacing, "spawning tab process");
        let spawned = self
            .inner
            .spawner
            .spawn(self.inner.channel.local_namespace())
            .await?;
        let process_id = spawned.process_id;

        state.record_spawn(process_id);
        self.inner
            .channel
            .attach(process_id, spawned.stdout, spawned.stdin);
        if let Some(child) = spawned.child {
            lock(&self.inner.children).insert(process_id, child);
        }
        self.inner
            .events
            .publish(SupervisorEvent::ProcessSpawned { process_id });

        match self
            .inner
            .channel
            .wait_ready(process_id, self.inner.ready_timeout)
            .await
        {
            Ok(()) => {
                state.mark_alive(process_id);
                if let Some(old) = replacing {
                    state.record_respawn(old, process_id);
                }
                info!(process_id, ?replacing, "tab process alive");
                self.inner
                    .events
                    .publish(SupervisorEvent::ProcessAlive { process_id });
                Ok(process_id)
            }
            Err(_) => {
                warn!(process_id, "tab process never became ready");
                state.mark_dead(process_id);
                self.inner.channel.detach(process_id);
                self.reap(process_id);
                Err(SupervisorError::NotReady(process_id))
            }
        }
    }

    /// Mark `process_id` dead and tell every bound tab. Returns the
    /// affected sockets; a second notification for the same death is a
    /// no-op.
    pub async fn notify_death(&self, process_id: u32) -> Vec<u64> {
        let sockets = {
            let mut state = self.inner.state.lock().await;
            if !state.mark_dead(process_id) {
                return Vec::new();
            }
            state.sockets_on(process_id)
        };

        self.inner.channel.detach(process_id);
        self.reap(process_id);
        warn!(process_id, tabs = sockets.len(), "tab process died");
        self.inner.events.publish(SupervisorEvent::ProcessDied {
            process_id,
            sockets: sockets.clone(),
        });
        sockets
    }

    pub async fn bind(&self, socket_id: u64, process_id: u32) {
        let previous = self.inner.state.lock().await.bind(socket_id, process_id);
        if let Some(previous) = previous.filter(|p| *p != process_id) {
            debug!(socket_id, from = previous, to = process_id, "rebinding socket");
            self.release_if_orphaned(previous).await;
        }
    }

    /// The tab on `socket_id` has re-established its state on `process_id`.
    pub async fn confirm_bound(&self, socket_id: u64, process_id: u32) -> bool {
        self.inner
            .state
            .lock()
            .await
            .confirm_bound(socket_id, process_id)
    }

    /// Forget the socket. A live process left without tabs is released.
    pub async fn unbind(&self, socket_id: u64) -> Option<u32> {
        let process_id = self.inner.state.lock().await.unbind(socket_id)?;
        self.release_if_orphaned(process_id).await;
        Some(process_id)
    }

    async fn release_if_orphaned(&self, process_id: u32) {
        let release = {
            let mut state = self.inner.state.lock().await;
            let orphaned = !state.is_referenced(process_id)
                && state.process_state(process_id) == Some(ProcessState::Alive);
            if orphaned {
                state.forget(process_id);
            }
            orphaned
        };
        if release {
            info!(process_id, "releasing tab process without tabs");
            self.inner.channel.detach(process_id);
            self.reap(process_id);
            self.inner
                .events
                .publish(SupervisorEvent::ProcessReleased { process_id });
        }
    }

    /// Give the child a grace period to exit on its own, then kill it.
    fn reap(&self, process_id: u32) {
        let Some(mut child) = lock(&self.inner.children).remove(&process_id) else {
            return;
        };
        let grace = self.inner.reap_grace;
        tokio::spawn(async move {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(process_id, %status, "tab process exited"),
                Ok(Err(e)) => debug!(process_id, error = %e, "waiting for tab process failed"),
                Err(_) => {
                    warn!(process_id, "tab process did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        });
    }

    /// Close every link and stop every child.
    pub async fn shutdown(&self) {
        let pids: Vec<u32> = self.inner.channel.peers();
        {
            let mut state = self.inner.state.lock().await;
            for pid in &pids {
                state.forget(*pid);
            }
        }
        for pid in pids {
            self.inner.channel.detach(pid);
            self.reap(pid);
        }
        info!("supervisor shut down");
    }

    pub async fn process_state(&self, process_id: u32) -> Option<ProcessState> {
        self.inner.state.lock().await.process_state(process_id)
    }

    pub async fn died_map(&self) -> HashMap<u32, u32> {
        self.inner.state.lock().await.died_map().clone()
    }

    pub async fn binding(&self, socket_id: u64) -> Option<u32> {
        self.inner.state.lock().await.binding(socket_id)
    }
}

async fn watch_links(
    inner: Weak<SupervisorInner>,
    mut links: tokio::sync::broadcast::Receiver<LinkEvent>,
) {
    loop {
        let event = match links.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "supervisor missed link events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match event {
            LinkEvent::Ready { .. } => {}
            LinkEvent::Disconnected { process_id } | LinkEvent::Lost { process_id } => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                ProcessSupervisor { inner }.notify_death(process_id).await;
            }
        }
    }
}
