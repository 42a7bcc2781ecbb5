//! Routes notifications from tab processes to the proxies they belong to.
//!
//! Handlers are registered once per tab process namespace. Each proxy
//! holds a route keyed by `(process_id, socket_id)`, so a straggling
//! notification from a replaced process never reaches a rebound tab.

use crate::remote::ProxyInner;
use crate::wire::{LogMessage, TabNotification, LOG_MESSAGE};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tabhost_common::sync::lock;
use tabhost_common::{encode_tab_interface, ChannelError};
use tabhost_ipc::{Inbound, MessageChannel};
use tracing::{debug, error, info, warn};

struct HubInner {
    channel: MessageChannel,
    routes: Mutex<HashMap<(u32, u64), Weak<ProxyInner>>>,
    installed: Mutex<HashSet<u32>>,
}

#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new(channel: MessageChannel) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channel,
                routes: Mutex::new(HashMap::new()),
                installed: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Register handlers for `process_id`'s namespace. Idempotent.
    pub fn install(&self, process_id: u32) -> Result<(), ChannelError> {
        let mut installed = lock(&self.inner.installed);
        if installed.contains(&process_id) {
            return Ok(());
        }
        let namespace = encode_tab_interface(process_id);
        let methods = TabNotification::METHODS.iter().copied().chain([LOG_MESSAGE]);
        for method in methods {
            let hub = Arc::downgrade(&self.inner);
            self.inner
                .channel
                .register_handler(&namespace, method, move |inbound| match hub.upgrade() {
                    Some(hub) => hub.deliver(inbound),
                    None => Ok(Value::Null),
                })?;
        }
        installed.insert(process_id);
        debug!(process_id, "notification handlers installed");
        Ok(())
    }

    pub fn is_installed(&self, process_id: u32) -> bool {
        lock(&self.inner.installed).contains(&process_id)
    }

    pub(crate) fn route(&self, process_id: u32, socket_id: u64, proxy: Weak<ProxyInner>) {
        lock(&self.inner.routes).insert((process_id, socket_id), proxy);
    }

    pub(crate) fn unroute(&self, process_id: u32, socket_id: u64) {
        lock(&self.inner.routes).remove(&(process_id, socket_id));
    }

    /// Drop the handlers and routes of a process that is gone.
    pub fn forget(&self, process_id: u32) {
        if lock(&self.inner.installed).remove(&process_id) {
            self.inner
                .channel
                .unregister_namespace(&encode_tab_interface(process_id));
        }
        lock(&self.inner.routes).retain(|(pid, _), _| *pid != process_id);
    }

    pub fn route_count(&self) -> usize {
        lock(&self.inner.routes).len()
    }
}

impl HubInner {
    fn deliver(&self, inbound: Inbound) -> Result<Value, String> {
        if inbound.method == LOG_MESSAGE {
            forward_log(inbound.process_id, inbound.args);
            return Ok(Value::Null);
        }
        let Some(socket_id) = inbound.socket_id else {
            debug!(process_id = inbound.process_id, method = %inbound.method, "notification without socket");
            return Ok(Value::Null);
        };
        let process_id = inbound.process_id;
        let notification = TabNotification::parse(&inbound.method, inbound.args)?;

        let target = lock(&self.routes)
            .get(&(process_id, socket_id))
            .and_then(Weak::upgrade);
        match target {
            Some(proxy) => proxy.apply(process_id, notification),
            None => debug!(process_id, socket_id, "notification for unknown tab"),
        }
        Ok(Value::Null)
    }
}

fn forward_log(process_id: u32, args: Value) {
    let Ok(log) = serde_json::from_value::<LogMessage>(args) else {
        debug!(process_id, "malformed log message");
        return;
    };
    match log.level.as_str() {
        "error" => error!(process_id, "{}", log.message),
        "warn" | "warning" => warn!(process_id, "{}", log.message),
        "debug" | "trace" => debug!(process_id, "{}", log.message),
        _ => info!(process_id, "{}", log.message),
    }
}
