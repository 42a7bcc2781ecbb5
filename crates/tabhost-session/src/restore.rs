//! Rebuilding tabs from a session, and snapshotting live tabs into one.

use crate::record::{PositionedRecord, SessionRecord, TabRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tabhost_common::{next_socket_id, TabError};
use tabhost_tabs::{
    EngineFactory, LocalTab, ProxyPhase, TabControl, TabRouter, TabSlot, TabStrip,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreFlags {
    /// Tabs saved on one process share a process again. When false every
    /// remote tab gets its own.
    pub share_process: bool,
}

impl Default for RestoreFlags {
    fn default() -> Self {
        Self {
            share_process: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub local: usize,
    pub remote: usize,
    /// Positions of remote tabs left without a process.
    pub failed: Vec<usize>,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.local + self.remote
    }
}

/// Insert the session's tabs into `strip` in stored position order, each
/// at its stored index (clamped to the end of the strip).
///
/// Saved pids come from another run, so they only group tabs: the first
/// tab of a saved pid resolves it through the supervisor and later tabs
/// of that pid follow it onto the same process.
pub async fn restore(
    records: &[PositionedRecord],
    flags: RestoreFlags,
    router: &TabRouter,
    engines: &EngineFactory,
    strip: &mut TabStrip,
) -> Result<RestoreReport, TabError> {
    let mut ordered: Vec<&PositionedRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.index);

    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut report = RestoreReport::default();
    for positioned in ordered {
        let record = &positioned.record;
        let tab: Arc<dyn TabControl> = match record.process_id {
            None => {
                report.local += 1;
                Arc::new(LocalTab::new(next_socket_id(), engines(), router.events()))
            }
            Some(saved) => {
                let requested = flags
                    .share_process
                    .then(|| remap.get(&saved).copied().unwrap_or(saved));
                let proxy = router.open_remote(requested).await?;
                match proxy.process_id() {
                    Some(actual) if proxy.phase() == ProxyPhase::Bound => {
                        remap.entry(saved).or_insert(actual);
                    }
                    _ => report.failed.push(positioned.index),
                }
                report.remote += 1;
                Arc::new(proxy)
            }
        };
        tab.set_history(&record.history);
        strip.insert(positioned.index, tab, record.state)?;
    }
    info!(
        local = report.local,
        remote = report.remote,
        failed = report.failed.len(),
        "session restored"
    );
    Ok(report)
}

/// Snapshot every restorable tab.
pub async fn capture(strip: &TabStrip) -> SessionRecord {
    let slots: Vec<TabSlot> = strip.iter().cloned().collect();
    capture_slots(&slots).await
}

pub async fn capture_slots(slots: &[TabSlot]) -> SessionRecord {
    let mut records = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        let socket_id = slot.socket_id();
        match slot.tab.get_history(None).await {
            Ok(history) if history.is_blank() => debug!(socket_id, "not saving blank tab"),
            Ok(history) => records.push(PositionedRecord {
                index,
                record: TabRecord {
                    process_id: slot.tab.process_id(),
                    state: slot.state,
                    history,
                },
            }),
            Err(e) => warn!(socket_id, error = %e, "tab not saved"),
        }
    }
    records
}
