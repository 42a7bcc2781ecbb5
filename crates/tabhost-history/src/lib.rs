//! Navigation history: records, the versioned text codec, and the
//! engine-side back/forward list.

pub mod back_forward;
pub mod record;
pub mod serializer;

pub use back_forward::BackForwardList;
pub use record::{HistoryEntry, HistoryItem, HistoryRecord, BLANK_TITLE, BLANK_URI};
pub use serializer::{deserialize, entry_at_offset, from_value, serialize, to_value};
