//! Bidirectional message channel multiplexed by identity.
//!
//! One [`MessageChannel`] per process. Each peer process gets a link: a
//! reader task that dispatches inbound frames and a FIFO writer task, so
//! repeated calls to the same identity and method arrive in order.
//!
//! Lock order is `links` then `pending`. No std lock is held across an
//! await point.

use crate::protocol::{self, Frame, PROCESS_READY};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tabhost_common::sync::lock;
use tabhost_common::{ChannelError, EventBus, Identity, NamespaceToken};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

// ===== TYPES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Attached, the peer has not announced itself yet.
    Connecting,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Ready { process_id: u32 },
    /// The transport reached EOF or failed, or the link was detached.
    Disconnected { process_id: u32 },
    /// A query timed out; the peer is presumed hung.
    Lost { process_id: u32 },
}

impl LinkEvent {
    pub fn process_id(&self) -> u32 {
        match *self {
            LinkEvent::Ready { process_id }
            | LinkEvent::Disconnected { process_id }
            | LinkEvent::Lost { process_id } => process_id,
        }
    }
}

/// An inbound command or query handed to a registered handler.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub process_id: u32,
    pub socket_id: Option<u64>,
    pub method: String,
    pub args: Value,
}

impl Inbound {
    pub fn identity(&self) -> Option<Identity> {
        self.socket_id.map(|s| Identity::new(self.process_id, s))
    }
}

/// Handlers run on the link's reader task and must not block.
pub type Handler = Arc<dyn Fn(Inbound) -> Result<Value, String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub query_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

type QueryResult = Result<Value, ChannelError>;

struct PendingQuery {
    process_id: u32,
    socket_id: Option<u64>,
    reply: oneshot::Sender<QueryResult>,
}

struct PeerLink {
    generation: u64,
    state: watch::Sender<LinkState>,
    outbound: mpsc::UnboundedSender<Frame>,
    reader: JoinHandle<()>,
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        // The writer drains whatever is queued once `outbound` is gone.
        self.state.send_replace(LinkState::Closed);
        self.reader.abort();
    }
}

struct ChannelInner {
    local: NamespaceToken,
    options: ChannelOptions,
    handlers: Mutex<HashMap<(String, String), Handler>>,
    links: Mutex<HashMap<u32, PeerLink>>,
    pending: Mutex<HashMap<u64, PendingQuery>>,
    next_correlation: AtomicU64,
    next_generation: AtomicU64,
    events: EventBus<LinkEvent>,
}

// ===== CHANNEL =====

#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl MessageChannel {
    /// `local` tags every outbound frame and decides which inbound
    /// interface family is accepted (the opposite one).
    pub fn new(local: NamespaceToken, options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                local,
                options,
                handlers: Mutex::new(HashMap::new()),
                links: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_correlation: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                events: EventBus::new(256),
            }),
        }
    }

    pub fn local_namespace(&self) -> &NamespaceToken {
        &self.inner.local
    }

    pub fn query_timeout(&self) -> Duration {
        self.inner.options.query_timeout
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Start exchanging frames with `process_id` over the given transport.
    /// A previous link to the same process is replaced.
    pub fn attach<R, W>(&self, process_id: u32, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Connecting);
        let max_frame_bytes = self.inner.options.max_frame_bytes;

        let mut links = lock(&self.inner.links);
        tokio::spawn(write_loop(
            Arc::downgrade(&self.inner),
            process_id,
            generation,
            writer,
            rx,
        ));
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            process_id,
            generation,
            reader,
            max_frame_bytes,
        ));
        let previous = links.insert(
            process_id,
            PeerLink {
                generation,
                state,
                outbound,
                reader,
            },
        );
        drop(links);

        if previous.is_some() {
            warn!(process_id, "replaced existing peer link");
        }
        info!(process_id, generation, "peer link attached");
    }

    /// Drop the link to `process_id`. Frames already queued are still
    /// written. Pending queries fail with `PeerUnavailable`.
    pub fn detach(&self, process_id: u32) -> bool {
        self.inner
            .close_link(process_id, None, LinkEvent::Disconnected { process_id })
    }

    pub fn link_state(&self, process_id: u32) -> LinkState {
        lock(&self.inner.links)
            .get(&process_id)
            .map(|link| *link.state.borrow())
            .unwrap_or(LinkState::Closed)
    }

    pub fn is_available(&self, process_id: u32) -> bool {
        self.link_state(process_id) != LinkState::Closed
    }

    pub fn peers(&self) -> Vec<u32> {
        lock(&self.inner.links).keys().copied().collect()
    }

    /// Wait until `process_id` announces itself with `process_ready`.
    pub async fn wait_ready(&self, process_id: u32, timeout: Duration) -> Result<(), ChannelError> {
        let mut rx = lock(&self.inner.links)
            .get(&process_id)
            .map(|link| link.state.subscribe())
            .ok_or(ChannelError::PeerUnavailable { process_id })?;

        let ready = match tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != LinkState::Connecting),
        )
        .await
        {
            Ok(Ok(state)) => *state == LinkState::Ready,
            _ => false,
        };

        if ready {
            Ok(())
        } else {
            Err(ChannelError::PeerUnavailable { process_id })
        }
    }

    pub fn register_handler<F>(
        &self,
        namespace: &NamespaceToken,
        method: &str,
        handler: F,
    ) -> Result<(), ChannelError>
    where
        F: Fn(Inbound) -> Result<Value, String> + Send + Sync + 'static,
    {
        let key = (namespace.as_str().to_string(), method.to_string());
        let mut handlers = lock(&self.inner.handlers);
        if handlers.contains_key(&key) {
            return Err(ChannelError::DuplicateHandler {
                namespace: key.0,
                method: key.1,
            });
        }
        handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Remove every handler registered under `namespace`.
    pub fn unregister_namespace(&self, namespace: &NamespaceToken) -> usize {
        let mut handlers = lock(&self.inner.handlers);
        let before = handlers.len();
        handlers.retain(|(ns, _), _| ns != namespace.as_str());
        before - handlers.len()
    }

    /// Fire-and-forget. A command to an unavailable peer is dropped.
    pub fn send_command(&self, identity: Identity, method: &str, args: Value) {
        let frame = Frame::Command {
            namespace: self.inner.local.clone(),
            socket_id: Some(identity.socket_id),
            method: method.to_string(),
            args,
        };
        if !self.inner.enqueue(identity.process_id, frame) {
            warn!(
                process_id = identity.process_id,
                socket_id = identity.socket_id,
                method,
                "dropping command to unavailable peer"
            );
        }
    }

    /// Command addressed to the process itself rather than one tab.
    pub fn send_process_command(&self, process_id: u32, method: &str, args: Value) {
        let frame = Frame::Command {
            namespace: self.inner.local.clone(),
            socket_id: None,
            method: method.to_string(),
            args,
        };
        if !self.inner.enqueue(process_id, frame) {
            warn!(process_id, method, "dropping command to unavailable peer");
        }
    }

    /// Tell the peer this process is ready to serve.
    pub fn announce_ready(&self, process_id: u32) {
        self.send_process_command(process_id, PROCESS_READY, Value::Null);
    }

    /// Send a query and wait for its reply.
    ///
    /// Fails with `PeerUnavailable` immediately when no live link exists,
    /// and after the query timeout otherwise (the link is then marked
    /// lost). `Cancelled` means [`cancel_socket`](Self::cancel_socket) ran.
    pub async fn send_query(
        &self,
        identity: Identity,
        method: &str,
        args: Value,
    ) -> Result<Value, ChannelError> {
        let process_id = identity.process_id;
        let correlation = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        {
            let links = lock(&self.inner.links);
            let link = links
                .get(&process_id)
                .ok_or(ChannelError::PeerUnavailable { process_id })?;
            lock(&self.inner.pending).insert(
                correlation,
                PendingQuery {
                    process_id,
                    socket_id: Some(identity.socket_id),
                    reply,
                },
            );
            let frame = Frame::Query {
                namespace: self.inner.local.clone(),
                socket_id: Some(identity.socket_id),
                method: method.to_string(),
                args,
                correlation,
            };
            if link.outbound.send(frame).is_err() {
                lock(&self.inner.pending).remove(&correlation);
                return Err(ChannelError::PeerUnavailable { process_id });
            }
        }

        match tokio::time::timeout(self.inner.options.query_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Cancelled),
            Err(_) => {
                lock(&self.inner.pending).remove(&correlation);
                warn!(
                    process_id,
                    socket_id = identity.socket_id,
                    method,
                    "query timed out, marking peer lost"
                );
                self.inner
                    .close_link(process_id, None, LinkEvent::Lost { process_id });
                Err(ChannelError::PeerUnavailable { process_id })
            }
        }
    }

    /// Drop every in-flight query for `socket_id`. Their callers see
    /// `Cancelled`; replies arriving later are discarded.
    pub fn cancel_socket(&self, socket_id: u64) -> usize {
        let mut pending = lock(&self.inner.pending);
        let before = pending.len();
        pending.retain(|_, q| q.socket_id != Some(socket_id));
        let cancelled = before - pending.len();
        if cancelled > 0 {
            debug!(socket_id, cancelled, "cancelled in-flight queries");
        }
        cancelled
    }

    pub fn pending_queries(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

// ===== INNER =====

impl ChannelInner {
    fn enqueue(&self, process_id: u32, frame: Frame) -> bool {
        lock(&self.links)
            .get(&process_id)
            .map(|link| link.outbound.send(frame).is_ok())
            .unwrap_or(false)
    }

    fn handler(&self, namespace: &NamespaceToken, method: &str) -> Option<Handler> {
        lock(&self.handlers)
            .get(&(namespace.as_str().to_string(), method.to_string()))
            .cloned()
    }

    /// Inbound frames must come from the opposite interface family and
    /// name the process they actually arrived from.
    fn accepts(&self, namespace: &NamespaceToken, process_id: u32) -> bool {
        match NamespaceToken::parse(namespace.as_str()) {
            Some((interface, origin)) => {
                self.local.interface() != Some(interface) && origin == process_id
            }
            None => false,
        }
    }

    fn mark_ready(&self, process_id: u32) {
        let changed = lock(&self.links)
            .get(&process_id)
            .map(|link| {
                link.state.send_if_modified(|state| {
                    if *state == LinkState::Connecting {
                        *state = LinkState::Ready;
                        true
                    } else {
                        false
                    }
                })
            })
            .unwrap_or(false);
        if changed {
            info!(process_id, "peer ready");
            self.events.publish(LinkEvent::Ready { process_id });
        }
    }

    fn close_link(&self, process_id: u32, generation: Option<u64>, event: LinkEvent) -> bool {
        let link = {
            let mut links = lock(&self.links);
            match links.get(&process_id) {
                Some(link) if generation.map_or(true, |g| g == link.generation) => {
                    links.remove(&process_id)
                }
                _ => None,
            }
        };
        let Some(link) = link else {
            return false;
        };
        drop(link);

        let failed = self.fail_pending(process_id);
        info!(process_id, failed_queries = failed, ?event, "peer link closed");
        self.events.publish(event);
        true
    }

    fn fail_pending(&self, process_id: u32) -> usize {
        let failed: Vec<PendingQuery> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, q)| q.process_id == process_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        let count = failed.len();
        for query in failed {
            let _ = query
                .reply
                .send(Err(ChannelError::PeerUnavailable { process_id }));
        }
        count
    }

    fn dispatch(&self, process_id: u32, line: &str) {
        let frame = match protocol::decode(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(process_id, error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Command {
                namespace,
                socket_id,
                method,
                args,
            } => {
                if !self.accepts(&namespace, process_id) {
                    warn!(process_id, %namespace, method, "rejecting command on foreign namespace");
                    return;
                }
                if method == PROCESS_READY && socket_id.is_none() {
                    self.mark_ready(process_id);
                    return;
                }
                let Some(handler) = self.handler(&namespace, &method) else {
                    debug!(process_id, ?socket_id, method, "no handler for command");
                    return;
                };
                let inbound = Inbound {
                    process_id,
                    socket_id,
                    method,
                    args,
                };
                if let Err(e) = handler(inbound) {
                    debug!(process_id, ?socket_id, error = %e, "command handler failed");
                }
            }
            Frame::Query {
                namespace,
                socket_id,
                method,
                args,
                correlation,
            } => {
                let result = if !self.accepts(&namespace, process_id) {
                    warn!(process_id, %namespace, method, "rejecting query on foreign namespace");
                    Err(format!("namespace {namespace} is not accepted here"))
                } else {
                    match self.handler(&namespace, &method) {
                        Some(handler) => handler(Inbound {
                            process_id,
                            socket_id,
                            method,
                            args,
                        }),
                        None => Err(format!("no handler for {method}")),
                    }
                };
                if !self.enqueue(process_id, Frame::reply(correlation, result)) {
                    debug!(process_id, correlation, "could not send reply, peer gone");
                }
            }
            Frame::Reply {
                correlation,
                ok,
                error,
            } => self.complete(process_id, correlation, ok, error),
        }
    }

    fn complete(&self, process_id: u32, correlation: u64, ok: Option<Value>, error: Option<String>) {
        let query = {
            let mut pending = lock(&self.pending);
            match pending.get(&correlation) {
                Some(q) if q.process_id == process_id => pending.remove(&correlation),
                Some(q) => {
                    warn!(
                        process_id,
                        expected = q.process_id,
                        correlation,
                        "reply from unexpected peer"
                    );
                    return;
                }
                None => None,
            }
        };
        let Some(query) = query else {
            debug!(process_id, correlation, "dropping late reply");
            return;
        };
        let result = match error {
            Some(message) => Err(ChannelError::Remote(message)),
            None => Ok(ok.unwrap_or(Value::Null)),
        };
        // The caller may have given up already.
        let _ = query.reply.send(result);
    }
}

// ===== LINK TASKS =====

async fn write_loop<W>(
    inner: Weak<ChannelInner>,
    process_id: u32,
    generation: u64,
    writer: W,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(frame) = rx.recv().await {
        let line = match protocol::encode(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!(process_id, kind = frame.kind(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            debug!(process_id, error = %e, "peer write failed");
            if let Some(strong) = inner.upgrade() {
                strong.close_link(
                    process_id,
                    Some(generation),
                    LinkEvent::Disconnected { process_id },
                );
            }
            return;
        }
    }
    debug!(process_id, generation, "writer drained");
}

async fn read_loop<R>(
    inner: Weak<ChannelInner>,
    process_id: u32,
    generation: u64,
    reader: R,
    max_frame_bytes: usize,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_frame_bytes));
    while let Some(next) = lines.next().await {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        match next {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => strong.dispatch(process_id, &line),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(process_id, max_frame_bytes, "dropping oversized frame");
            }
            Err(LinesCodecError::Io(e)) => {
                debug!(process_id, error = %e, "peer read failed");
                break;
            }
        }
    }
    if let Some(strong) = inner.upgrade() {
        strong.close_link(
            process_id,
            Some(generation),
            LinkEvent::Disconnected { process_id },
        );
    }
}

// ===== TESTS =====
