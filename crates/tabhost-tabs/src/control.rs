//! The control surface every tab exposes, local or remote.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabhost_common::{Identity, TabError};
use tabhost_history::{HistoryItem, HistoryRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    In,
    Out,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub forward: bool,
    #[serde(default = "default_true")]
    pub wrap: bool,
}

impl FindRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            case_sensitive: false,
            forward: true,
            wrap: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRequest {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
    pub highlight: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    Local,
    Remote,
}

/// Calling code holds `Arc<dyn TabControl>` and never needs to know
/// whether the engine runs in this process.
///
/// Commands are fire-and-forget. Queries suspend the caller, never the
/// thread.
#[async_trait]
pub trait TabControl: Send + Sync {
    fn socket_id(&self) -> u64;

    /// `None` for an in-process tab.
    fn process_id(&self) -> Option<u32>;

    fn identity(&self) -> Option<Identity> {
        self.process_id()
            .map(|pid| Identity::new(pid, self.socket_id()))
    }

    fn kind(&self) -> TabKind;

    /// Last title reported by the engine.
    fn title(&self) -> String;

    /// Last uri reported by the engine.
    fn uri(&self) -> String;

    fn is_closed(&self) -> bool;

    fn load_uri(&self, uri: &str);
    fn go_back(&self);
    fn go_forward(&self);
    fn go_to_history_item(&self, offset: i64);
    fn stop_loading(&self);
    fn reload(&self);
    fn zoom(&self, direction: ZoomDirection);
    fn print_page(&self);
    fn set_highlight(&self, request: HighlightRequest);
    fn set_history(&self, record: &HistoryRecord);

    async fn find(&self, request: FindRequest) -> Result<u32, TabError>;

    /// Snapshot of the history, `override_index` replacing the live index.
    async fn get_history(&self, override_index: Option<i64>) -> Result<HistoryRecord, TabError>;

    /// History up to and including the current entry.
    async fn get_back_history(&self) -> Result<HistoryRecord, TabError>;

    async fn get_current_item(&self) -> Result<HistoryItem, TabError>;
    async fn get_back_item(&self) -> Result<HistoryItem, TabError>;
    async fn get_forward_item(&self) -> Result<HistoryItem, TabError>;
    async fn can_go_back(&self) -> Result<bool, TabError>;
    async fn can_go_forward(&self) -> Result<bool, TabError>;

    /// Terminal. Later calls are no-ops and in-flight queries are dropped.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_request_defaults() {
        let req: FindRequest = serde_json::from_str(r#"{"text":"rust"}"#).unwrap();
        assert_eq!(req, FindRequest::new("rust"));
    }

    #[test]
    fn zoom_direction_wire_names() {
        assert_eq!(serde_json::to_string(&ZoomDirection::In).unwrap(), "\"in\"");
        assert_eq!(
            serde_json::from_str::<ZoomDirection>("\"reset\"").unwrap(),
            ZoomDirection::Reset
        );
    }
}
