//! Message channel between the main window and tab processes.
//!
//! Newline-delimited JSON frames over any `AsyncRead`/`AsyncWrite` pair:
//! child stdio in production, `tokio::io::duplex` in tests.

pub mod channel;
pub mod protocol;

pub use channel::{ChannelOptions, Handler, Inbound, LinkEvent, LinkState, MessageChannel};
pub use protocol::{Frame, PROCESS_READY};
