//! Session store: saved tabs on disk or in a clipboard buffer, restore
//! into a tab strip, and the recently-closed list.

pub mod closed;
pub mod record;
pub mod restore;
pub mod store;

pub use closed::{ClosedTab, ClosedTabs};
pub use record::{PositionedRecord, SessionRecord, TabRecord};
pub use restore::{capture, capture_slots, restore, RestoreFlags, RestoreReport};
pub use store::{decode_session, encode_session, load, save, SessionSource, SessionTarget};
