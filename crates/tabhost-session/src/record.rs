//! One saved tab, and the record shapes older sessions used.
//!
//! Written shape: `{"pid": "1234", "state": "H", "history": [-1, [[t, u], ...]]}`
//! with `pid` empty for an in-process tab. Read shapes, sniffed per record:
//!
//! * the dictionary above, `history` possibly a JSON string
//! * `[pid, state, history]`
//! * `[pid, history]` with an implicit `N` state

use serde::Serialize;
use serde_json::Value;
use tabhost_history::{from_value, to_value, HistoryRecord};
use tabhost_tabs::TabState;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRecord {
    /// `None` for an in-process tab.
    pub process_id: Option<u32>,
    pub state: TabState,
    pub history: HistoryRecord,
}

/// A record and the position of its tab in the strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedRecord {
    pub index: usize,
    pub record: TabRecord,
}

pub type SessionRecord = Vec<PositionedRecord>;

#[derive(Serialize)]
struct RecordDict<'a> {
    pid: String,
    state: &'a str,
    history: Value,
}

impl TabRecord {
    pub fn local(state: TabState, history: HistoryRecord) -> Self {
        Self {
            process_id: None,
            state,
            history,
        }
    }

    pub fn remote(process_id: u32, state: TabState, history: HistoryRecord) -> Self {
        Self {
            process_id: Some(process_id),
            state,
            history,
        }
    }

    /// Nothing worth restoring.
    pub fn is_blank(&self) -> bool {
        self.history.is_blank()
    }

    pub fn to_value(&self) -> Value {
        let dict = RecordDict {
            pid: self.process_id.map(|p| p.to_string()).unwrap_or_default(),
            state: self.state.code(),
            history: to_value(&self.history, None),
        };
        serde_json::to_value(dict).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => {
                let history = map.get("history").ok_or("record has no history")?;
                Ok(Self {
                    process_id: parse_pid(map.get("pid").unwrap_or(&Value::Null))?,
                    state: parse_state(map.get("state").unwrap_or(&Value::Null))?,
                    history: parse_history(history)?,
                })
            }
            Value::Array(items) => match items.as_slice() {
                [pid, state, history] => Ok(Self {
                    process_id: parse_pid(pid)?,
                    state: parse_state(state)?,
                    history: parse_history(history)?,
                }),
                [pid, history] => Ok(Self {
                    process_id: parse_pid(pid)?,
                    state: TabState::Normal,
                    history: parse_history(history)?,
                }),
                other => Err(format!("record tuple has {} fields", other.len())),
            },
            other => Err(format!("record is not an object or tuple: {other}")),
        }
    }
}

fn parse_pid(value: &Value) -> Result<Option<u32>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw == "null" {
                return Ok(None);
            }
            raw.parse()
                .map(Some)
                .map_err(|_| format!("bad pid {raw:?}"))
        }
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| format!("bad pid {n}")),
        other => Err(format!("bad pid {other}")),
    }
}

fn parse_state(value: &Value) -> Result<TabState, String> {
    match value {
        Value::Null => Ok(TabState::Normal),
        Value::String(code) => Ok(TabState::from_code(code.trim()).unwrap_or_else(|| {
            warn!(state = %code, "unknown tab state, using normal");
            TabState::Normal
        })),
        other => Err(format!("bad tab state {other}")),
    }
}

fn parse_history(value: &Value) -> Result<HistoryRecord, String> {
    from_value(value).map_err(|e| e.to_string())
}
