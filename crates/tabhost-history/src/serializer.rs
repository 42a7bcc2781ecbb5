//! History serializer.
//!
//! Wire shape: `[current_index, [[title, uri], ...]]`. Readers also accept
//! a dictionary `{"current_index" | "index": i, "entries": [...]}`,
//! entries written as `{"title", "uri"}` objects, numeric strings for the
//! index, and the whole history embedded as a JSON string (oldest session
//! files).

use crate::record::{clamp_offset, HistoryEntry, HistoryRecord};
use serde_json::{json, Value};
use tabhost_common::HistoryError;
use tracing::{debug, warn};

/// Engine value meaning "append the entries, do not navigate".
const LEGACY_APPEND_ONLY: i64 = 1;

/// Encode a record, optionally replacing its current index.
pub fn serialize(record: &HistoryRecord, override_index: Option<i64>) -> String {
    to_value(record, override_index).to_string()
}

/// Same as [`serialize`] but returns the JSON value, for embedding in a
/// session record.
pub fn to_value(record: &HistoryRecord, override_index: Option<i64>) -> Value {
    let index = override_index
        .map(|i| clamp_offset(i, record.len()))
        .unwrap_or_else(|| record.current_index());
    let entries: Vec<Value> = record
        .entries()
        .iter()
        .map(|e| json!([e.title, e.uri]))
        .collect();
    json!([index, entries])
}

pub fn deserialize(raw: &str) -> Result<HistoryRecord, HistoryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HistoryError::Malformed("empty history".into()));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| HistoryError::Malformed(format!("not JSON: {e}")))?;
    from_value(&value)
}

pub fn from_value(value: &Value) -> Result<HistoryRecord, HistoryError> {
    match value {
        Value::String(inner) => deserialize(inner),
        Value::Array(items) => match items.as_slice() {
            [index, entries] => build(parse_index(index)?, parse_entries(entries)?),
            _ => Err(HistoryError::Malformed(format!(
                "expected [index, entries], got {} elements",
                items.len()
            ))),
        },
        Value::Object(map) => {
            let index = match map.get("current_index").or_else(|| map.get("index")) {
                Some(v) => parse_index(v)?,
                None => 0,
            };
            let entries = map
                .get("entries")
                .ok_or_else(|| HistoryError::Malformed("missing 'entries'".into()))?;
            build(index, parse_entries(entries)?)
        }
        other => Err(HistoryError::Malformed(format!(
            "unexpected history value: {other}"
        ))),
    }
}

fn build(index: i64, entries: Vec<HistoryEntry>) -> Result<HistoryRecord, HistoryError> {
    let index = if index == LEGACY_APPEND_ONLY {
        debug!("normalizing append-only history index");
        0
    } else {
        index
    };
    let clamped = clamp_offset(index, entries.len());
    if clamped != index {
        warn!(
            index,
            clamped,
            entries = entries.len(),
            "history index out of range, clamping"
        );
    }
    Ok(HistoryRecord::new(clamped, entries))
}

fn parse_index(value: &Value) -> Result<i64, HistoryError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| HistoryError::Malformed(format!("bad index {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| HistoryError::Malformed(format!("bad index '{s}'"))),
        other => Err(HistoryError::Malformed(format!("bad index {other}"))),
    }
}

fn parse_entries(value: &Value) -> Result<Vec<HistoryEntry>, HistoryError> {
    let items = value
        .as_array()
        .ok_or_else(|| HistoryError::Malformed("entries is not an array".into()))?;
    items.iter().map(parse_entry).collect()
}

fn parse_entry(value: &Value) -> Result<HistoryEntry, HistoryError> {
    let (title, uri) = match value {
        Value::Array(pair) => match pair.as_slice() {
            [title, uri] => (title, uri),
            _ => {
                return Err(HistoryError::Malformed(format!(
                    "entry has {} elements",
                    pair.len()
                )))
            }
        },
        Value::Object(map) => (
            map.get("title").unwrap_or(&Value::Null),
            map.get("uri")
                .ok_or_else(|| HistoryError::Malformed("entry without uri".into()))?,
        ),
        other => return Err(HistoryError::Malformed(format!("bad entry {other}"))),
    };
    let uri = uri
        .as_str()
        .ok_or_else(|| HistoryError::Malformed("entry uri is not a string".into()))?;
    let title = match title {
        Value::String(t) => t.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    Ok(HistoryEntry::new(title, uri))
}

/// Entry at `offset`, or the About-Blank sentinel when the offset is out
/// of range or the record is empty.
pub fn entry_at_offset(record: &HistoryRecord, offset: i64) -> HistoryEntry {
    record
        .position_of(offset)
        .and_then(|pos| record.entries().get(pos))
        .cloned()
        .unwrap_or_else(HistoryEntry::blank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab(index: i64) -> HistoryRecord {
        HistoryRecord::new(
            index,
            vec![
                HistoryEntry::new("A", "http://a"),
                HistoryEntry::new("B", "http://b"),
            ],
        )
    }

    #[test]
    fn serialize_emits_pair_array() {
        assert_eq!(
            serialize(&ab(-1), None),
            r#"[-1,[["A","http://a"],["B","http://b"]]]"#
        );
    }

    #[test]
    fn override_index_replaces_current() {
        assert_eq!(
            serialize(&ab(-1), Some(0)),
            r#"[0,[["A","http://a"],["B","http://b"]]]"#
        );
        // Out-of-range overrides are clamped.
        assert!(serialize(&ab(0), Some(-9)).starts_with("[-1,"));
    }

    #[test]
    fn round_trip() {
        for record in [ab(0), ab(-1), HistoryRecord::default()] {
            let text = serialize(&record, None);
            assert_eq!(deserialize(&text).unwrap(), record);
        }
    }

    #[test]
    fn deserialize_accepts_dict_shape() {
        let dict = r#"{"current_index": -1, "entries": [["A","http://a"],["B","http://b"]]}"#;
        assert_eq!(deserialize(dict).unwrap(), ab(-1));

        let short = r#"{"index": -1, "entries": [{"title":"A","uri":"http://a"},{"title":"B","uri":"http://b"}]}"#;
        assert_eq!(deserialize(short).unwrap(), ab(-1));
    }

    #[test]
    fn deserialize_accepts_embedded_string() {
        let embedded = serde_json::to_string(&serialize(&ab(-1), None)).unwrap();
        assert_eq!(deserialize(&embedded).unwrap(), ab(-1));
    }

    #[test]
    fn deserialize_accepts_string_index() {
        assert_eq!(
            deserialize(r#"["-1", [["A","http://a"],["B","http://b"]]]"#).unwrap(),
            ab(-1)
        );
    }

    #[test]
    fn legacy_append_only_index_normalizes_to_zero() {
        let record = deserialize(r#"[1, [["A","http://a"],["B","http://b"]]]"#).unwrap();
        assert_eq!(record.current_index(), 0);
    }

    #[test]
    fn out_of_range_index_is_clamped() {
        let record = deserialize(r#"[-7, [["A","http://a"],["B","http://b"]]]"#).unwrap();
        assert_eq!(record.current_index(), -1);
    }

    #[test]
    fn malformed_input_is_rejected() {
        for bad in ["", "   ", "not json", "[]", "[0]", "{}", "42", r#"[0, "x"]"#, r#"[0, [["only-one"]]]"#] {
            assert!(
                matches!(deserialize(bad), Err(HistoryError::Malformed(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn entry_at_offset_is_total() {
        let record = ab(0);
        assert_eq!(entry_at_offset(&record, 0).title, "B");
        assert_eq!(entry_at_offset(&record, -1).title, "A");
        assert_eq!(entry_at_offset(&record, 1), HistoryEntry::blank());
        assert_eq!(entry_at_offset(&record, -2), HistoryEntry::blank());
        assert_eq!(entry_at_offset(&record, i64::MIN), HistoryEntry::blank());
    }

    #[test]
    fn empty_record_always_yields_blank() {
        let empty = HistoryRecord::default();
        for offset in [-1, 0, 1] {
            assert_eq!(entry_at_offset(&empty, offset), HistoryEntry::blank());
        }
    }

    #[test]
    fn every_offset_in_range_is_defined() {
        let record = HistoryRecord::new(
            0,
            (0..6)
                .map(|i| HistoryEntry::new(format!("t{i}"), format!("http://{i}")))
                .collect(),
        );
        let range = record.offset_range().unwrap();
        for offset in range {
            assert!(!entry_at_offset(&record, offset).is_blank());
        }
    }
}
