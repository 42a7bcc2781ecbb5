//! Session encode/decode and persistence.

use crate::record::{PositionedRecord, SessionRecord, TabRecord};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tabhost_common::SessionError;
use tracing::{debug, info, warn};

/// Where a session is written.
pub enum SessionTarget<'a> {
    File(&'a Path),
    /// Clipboard or drag payload.
    Buffer(&'a mut String),
}

/// Where a session is read from.
pub enum SessionSource<'a> {
    File(&'a Path),
    Buffer(&'a str),
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Pretty JSON array of dictionary-shaped records, in position order.
pub fn encode_session(records: &[PositionedRecord]) -> Result<String, SessionError> {
    let mut ordered: Vec<&PositionedRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.index);
    let values: Vec<Value> = ordered.iter().map(|r| r.record.to_value()).collect();
    serde_json::to_string_pretty(&values).map_err(|e| SessionError::Encode(e.to_string()))
}

/// Decode every record that can be decoded. Bad and blank records are
/// skipped; their positions are kept so the rest restore in order.
pub fn decode_session(raw: &str) -> Result<SessionRecord, SessionError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(collect_records(items.iter().enumerate())),
        Ok(other) => Err(SessionError::NotASession(kind_of(&other).to_string())),
        Err(e) => decode_lines(raw).ok_or_else(|| SessionError::NotASession(e.to_string())),
    }
}

/// Oldest files held one record per line.
fn decode_lines(raw: &str) -> Option<SessionRecord> {
    let values: Vec<Value> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str::<Value>)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.is_empty() {
        return None;
    }
    debug!(records = values.len(), "decoding line-per-record session");
    Some(collect_records(values.iter().enumerate()))
}

fn collect_records<'a>(items: impl Iterator<Item = (usize, &'a Value)>) -> SessionRecord {
    let mut records = Vec::new();
    for (index, value) in items {
        match TabRecord::from_value(value) {
            Ok(record) if record.is_blank() => debug!(index, "skipping blank session record"),
            Ok(record) => records.push(PositionedRecord { index, record }),
            Err(reason) => {
                let err = SessionError::Decode { index, reason };
                warn!(error = %err, "skipping session record");
            }
        }
    }
    records
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

pub fn save(records: &[PositionedRecord], target: SessionTarget<'_>) -> Result<(), SessionError> {
    let encoded = encode_session(records)?;
    match target {
        SessionTarget::File(path) => {
            write_atomic(path, &encoded)?;
            info!(path = %path.display(), tabs = records.len(), "session saved");
        }
        SessionTarget::Buffer(buffer) => {
            buffer.clear();
            buffer.push_str(&encoded);
        }
    }
    Ok(())
}

/// A missing file is an empty session.
pub fn load(source: SessionSource<'_>) -> Result<SessionRecord, SessionError> {
    match source {
        SessionSource::File(path) => match fs::read_to_string(path) {
            Ok(raw) => {
                let records = decode_session(&raw)?;
                info!(path = %path.display(), tabs = records.len(), "session loaded");
                Ok(records)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no session file");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        },
        SessionSource::Buffer(raw) => decode_session(raw),
    }
}

/// Write next to `path` and rename over it, so a crash mid-write never
/// leaves a truncated session.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "session".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabhost_history::{entry_at_offset, HistoryEntry, HistoryRecord};
    use tabhost_tabs::TabState;

    fn example_session() -> SessionRecord {
        vec![
            PositionedRecord {
                index: 0,
                record: TabRecord::local(
                    TabState::Normal,
                    HistoryRecord::single(HistoryEntry::new("Example", "http://example.com")),
                ),
            },
            PositionedRecord {
                index: 1,
                record: TabRecord::remote(
                    1234,
                    TabState::Hidden,
                    HistoryRecord::new(
                        -1,
                        vec![
                            HistoryEntry::new("A", "http://a"),
                            HistoryEntry::new("B", "http://b"),
                        ],
                    ),
                ),
            },
        ]
    }

    #[test]
    fn save_and_reload_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tabs.json");
        save(&example_session(), SessionTarget::File(&path)).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = load(SessionSource::File(&path)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].record.state, TabState::Normal);
        assert_eq!(loaded[0].record.process_id, None);
        assert_eq!(loaded[1].record.state, TabState::Hidden);
        assert_eq!(loaded[1].record.process_id, Some(1234));
        assert_eq!(
            entry_at_offset(&loaded[1].record.history, -1),
            HistoryEntry::new("A", "http://a")
        );
        assert_eq!(loaded, example_session());
    }

    #[test]
    fn buffer_round_trip() {
        let mut buffer = String::from("stale");
        save(&example_session(), SessionTarget::Buffer(&mut buffer)).unwrap();
        assert!(buffer.starts_with('['));
        assert_eq!(load(SessionSource::Buffer(&buffer)).unwrap(), example_session());
    }

    #[test]
    fn missing_file_is_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(SessionSource::File(&dir.path().join("absent.json"))).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn bad_and_blank_records_are_skipped() {
        let raw = r#"[
            {"pid": "", "state": "N", "history": [0, [["Blank", "about:blank"]]]},
            {"pid": "x1", "history": [0, []]},
            ["", "M", [0, [["Rust", "https://rust-lang.org"]]]]
        ]"#;
        let records = decode_session(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 2);
        assert_eq!(records[0].record.state, TabState::Minimized);
    }

    #[test]
    fn line_per_record_fallback() {
        let raw = "[\"\", [0, [[\"A\", \"http://a\"]]]]\n\n[\"42\", \"H\", [0, [[\"B\", \"http://b\"]]]]\n";
        let records = decode_session(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record.process_id, Some(42));
    }

    #[test]
    fn non_session_is_rejected() {
        assert!(matches!(
            decode_session(r#"{"pid": "1"}"#),
            Err(SessionError::NotASession(_))
        ));
        assert!(matches!(decode_session("not json at all"), Err(SessionError::NotASession(_))));
        assert!(decode_session("  \n").unwrap().is_empty());
    }

    #[test]
    fn encode_orders_by_index() {
        let mut session = example_session();
        session.reverse();
        let encoded = encode_session(&session).unwrap();
        let decoded = decode_session(&encoded).unwrap();
        assert_eq!(decoded[0].record.process_id, None);
        assert_eq!(decoded[1].record.process_id, Some(1234));
    }
}
