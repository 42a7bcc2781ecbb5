//! Wire protocol between the main window and tab processes.
//!
//! One JSON object per line. `command` frames are fire-and-forget,
//! `query` frames expect a `reply` carrying the same correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabhost_common::{ChannelError, NamespaceToken};

/// Process-level command a child sends once its handlers are installed.
pub const PROCESS_READY: &str = "process_ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Command {
        namespace: NamespaceToken,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_id: Option<u64>,
        method: String,
        #[serde(default)]
        args: Value,
    },
    Query {
        namespace: NamespaceToken,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_id: Option<u64>,
        method: String,
        #[serde(default)]
        args: Value,
        correlation: u64,
    },
    Reply {
        correlation: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    pub fn reply(correlation: u64, result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => Frame::Reply {
                correlation,
                ok: Some(value),
                error: None,
            },
            Err(message) => Frame::Reply {
                correlation,
                ok: None,
                error: Some(message),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Command { .. } => "command",
            Frame::Query { .. } => "query",
            Frame::Reply { .. } => "reply",
        }
    }
}

pub fn encode(frame: &Frame) -> Result<String, ChannelError> {
    serde_json::to_string(frame).map_err(|e| ChannelError::Protocol(e.to_string()))
}

pub fn decode(line: &str) -> Result<Frame, ChannelError> {
    serde_json::from_str(line).map_err(|e| ChannelError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabhost_common::encode_tab_interface;

    #[test]
    fn command_wire_shape() {
        let frame = Frame::Command {
            namespace: encode_tab_interface(12),
            socket_id: Some(3),
            method: "send_title".into(),
            args: json!({"title": "Example"}),
        };
        let line = encode(&frame).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["namespace"], "org.tabhost.tab12");
        assert_eq!(value["socket_id"], 3);
        assert!(!line.contains('\n'));
        assert_eq!(decode(&line).unwrap(), frame);
    }

    #[test]
    fn process_level_command_omits_socket() {
        let frame = Frame::Command {
            namespace: encode_tab_interface(12),
            socket_id: None,
            method: PROCESS_READY.into(),
            args: Value::Null,
        };
        let line = encode(&frame).unwrap();
        assert!(!line.contains("socket_id"));
    }

    #[test]
    fn reply_carries_ok_or_error() {
        let ok = encode(&Frame::reply(7, Ok(json!(true)))).unwrap();
        assert!(ok.contains("\"ok\":true"));
        assert!(!ok.contains("error"));

        let err = encode(&Frame::reply(7, Err("no such tab".into()))).unwrap();
        assert!(err.contains("\"error\":\"no such tab\""));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode("{"), Err(ChannelError::Protocol(_))));
        assert!(matches!(
            decode(r#"{"type":"shout","method":"x"}"#),
            Err(ChannelError::Protocol(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"query","namespace":"org.tabhost.tab1","method":"x"}"#),
            Err(ChannelError::Protocol(_))
        ));
    }
}
