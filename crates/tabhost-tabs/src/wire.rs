//! Typed messages exchanged between the window and tab processes.
//!
//! Each message travels as a channel frame `method` plus a JSON `args`
//! value. The enums here are adjacently tagged so the method name is the
//! serde tag and the variant payload is the args.

use crate::control::{FindRequest, HighlightRequest, ZoomDirection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Process-level diagnostic forwarded from a tab process.
pub const LOG_MESSAGE: &str = "log_message";

// =============================================================================
// WINDOW -> TAB PROCESS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum TabRequest {
    /// Create the engine for the addressed socket.
    SetSocketId,
    LoadUri { uri: String },
    GoBack,
    GoForward,
    GoToHistoryItem { offset: i64 },
    StopLoading,
    Reload,
    Zoom { direction: ZoomDirection },
    PrintPage,
    SetHighlight(HighlightRequest),
    /// `history` is the serialized pair-array form.
    SetHistory { history: Value },
    /// Close the addressed tab.
    Exit,

    // Queries
    Find(FindRequest),
    GetHistory {
        #[serde(default)]
        index: Option<i64>,
        #[serde(default)]
        back_only: bool,
    },
    GetCurrentItem,
    GetBackItem,
    GetForwardItem,
    CanGoBack,
    CanGoForward,
}

impl TabRequest {
    pub const METHODS: &'static [&'static str] = &[
        "set_socket_id",
        "load_uri",
        "go_back",
        "go_forward",
        "go_to_history_item",
        "stop_loading",
        "reload",
        "zoom",
        "print_page",
        "set_highlight",
        "set_history",
        "exit",
        "find",
        "get_history",
        "get_current_item",
        "get_back_item",
        "get_forward_item",
        "can_go_back",
        "can_go_forward",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            TabRequest::SetSocketId => "set_socket_id",
            TabRequest::LoadUri { .. } => "load_uri",
            TabRequest::GoBack => "go_back",
            TabRequest::GoForward => "go_forward",
            TabRequest::GoToHistoryItem { .. } => "go_to_history_item",
            TabRequest::StopLoading => "stop_loading",
            TabRequest::Reload => "reload",
            TabRequest::Zoom { .. } => "zoom",
            TabRequest::PrintPage => "print_page",
            TabRequest::SetHighlight(_) => "set_highlight",
            TabRequest::SetHistory { .. } => "set_history",
            TabRequest::Exit => "exit",
            TabRequest::Find(_) => "find",
            TabRequest::GetHistory { .. } => "get_history",
            TabRequest::GetCurrentItem => "get_current_item",
            TabRequest::GetBackItem => "get_back_item",
            TabRequest::GetForwardItem => "get_forward_item",
            TabRequest::CanGoBack => "can_go_back",
            TabRequest::CanGoForward => "can_go_forward",
        }
    }

    pub fn args(&self) -> Value {
        args_of(self)
    }

    pub fn parse(method: &str, args: Value) -> Result<Self, String> {
        parse_tagged(method, args)
    }
}

// =============================================================================
// TAB PROCESS -> WINDOW
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum TabNotification {
    #[serde(rename = "send_title")]
    Title { title: String },
    #[serde(rename = "send_uri")]
    Uri { uri: String },
    #[serde(rename = "send_progress")]
    Progress { progress: f64 },
    #[serde(rename = "send_back_forward")]
    BackForward {
        can_go_back: bool,
        can_go_forward: bool,
    },
    #[serde(rename = "send_history")]
    History { history: Value },
}

impl TabNotification {
    pub const METHODS: &'static [&'static str] = &[
        "send_title",
        "send_uri",
        "send_progress",
        "send_back_forward",
        "send_history",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            TabNotification::Title { .. } => "send_title",
            TabNotification::Uri { .. } => "send_uri",
            TabNotification::Progress { .. } => "send_progress",
            TabNotification::BackForward { .. } => "send_back_forward",
            TabNotification::History { .. } => "send_history",
        }
    }

    pub fn args(&self) -> Value {
        args_of(self)
    }

    pub fn parse(method: &str, args: Value) -> Result<Self, String> {
        parse_tagged(method, args)
    }
}

/// Diagnostic line a tab process asks the window to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
}

// =============================================================================
// TAG SPLITTING
// =============================================================================

fn args_of<T: Serialize>(message: &T) -> Value {
    match serde_json::to_value(message) {
        Ok(Value::Object(mut map)) => map.remove("args").unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn parse_tagged<T: DeserializeOwned>(method: &str, args: Value) -> Result<T, String> {
    let mut envelope = Map::new();
    envelope.insert("method".to_string(), Value::String(method.to_string()));
    if !args.is_null() {
        envelope.insert("args".to_string(), args);
    }
    serde_json::from_value(Value::Object(envelope)).map_err(|e| format!("bad {method} message: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_request_has_no_args() {
        assert_eq!(TabRequest::GoBack.args(), Value::Null);
        assert_eq!(TabRequest::parse("go_back", Value::Null).unwrap(), TabRequest::GoBack);
    }

    #[test]
    fn struct_request_args() {
        let req = TabRequest::LoadUri {
            uri: "https://a".into(),
        };
        assert_eq!(req.method(), "load_uri");
        assert_eq!(req.args(), json!({"uri": "https://a"}));
        assert_eq!(TabRequest::parse("load_uri", req.args()).unwrap(), req);
    }

    #[test]
    fn get_history_fields_default() {
        let req = TabRequest::parse("get_history", json!({})).unwrap();
        assert_eq!(
            req,
            TabRequest::GetHistory {
                index: None,
                back_only: false
            }
        );
    }

    #[test]
    fn newtype_request_args_are_inner_struct() {
        let req = TabRequest::Find(FindRequest::new("needle"));
        assert_eq!(req.args()["text"], "needle");
        assert_eq!(TabRequest::parse("find", req.args()).unwrap(), req);
    }

    #[test]
    fn method_names_match_method_list() {
        let samples = [
            TabRequest::SetSocketId,
            TabRequest::GoToHistoryItem { offset: -1 },
            TabRequest::Zoom {
                direction: ZoomDirection::Out,
            },
            TabRequest::SetHistory { history: json!([0, []]) },
            TabRequest::CanGoForward,
        ];
        for req in samples {
            assert!(TabRequest::METHODS.contains(&req.method()));
            assert_eq!(TabRequest::parse(req.method(), req.args()).unwrap(), req);
        }
    }

    #[test]
    fn unknown_method_rejected() {
        let err = TabRequest::parse("format_disk", Value::Null).unwrap_err();
        assert!(err.contains("format_disk"));
    }

    #[test]
    fn notification_method_names() {
        let note = TabNotification::Title {
            title: "Rust".into(),
        };
        assert_eq!(note.method(), "send_title");
        assert!(TabNotification::METHODS.contains(&note.method()));
        assert_eq!(TabNotification::parse("send_title", note.args()).unwrap(), note);

        let bf = TabNotification::parse(
            "send_back_forward",
            json!({"can_go_back": true, "can_go_forward": false}),
        )
        .unwrap();
        assert_eq!(
            bf,
            TabNotification::BackForward {
                can_go_back: true,
                can_go_forward: false
            }
        );
    }

    #[test]
    fn notification_methods_cover_every_variant() {
        let samples = [
            TabNotification::Title { title: String::new() },
            TabNotification::Uri { uri: String::new() },
            TabNotification::Progress { progress: 0.5 },
            TabNotification::BackForward {
                can_go_back: false,
                can_go_forward: false,
            },
            TabNotification::History { history: json!([0, []]) },
        ];
        let methods: Vec<&str> = samples.iter().map(TabNotification::method).collect();
        assert_eq!(methods, TabNotification::METHODS);
        assert!(TabNotification::parse("send_new_tab", json!({"uri": "https://a"})).is_err());
    }
}
