//! Shared types for the tabhost crates: errors, ids, the identity codec
//! and the typed event bus.

pub mod errors;
pub mod events;
pub mod id;
pub mod identity;
pub mod sync;

pub use errors::{
    ChannelError, ConfigError, HistoryError, SessionError, SupervisorError, TabError, TabhostError,
};
pub use events::EventBus;
pub use id::{next_socket_id, SocketIdAllocator};
pub use identity::{
    encode_main_interface, encode_tab_interface, Identity, Interface, NamespaceToken,
};

pub type Result<T> = std::result::Result<T, TabhostError>;
