//! Tabs: one control surface over in-process and remote engines.
//!
//! The window side holds [`TabControl`] objects in a [`TabStrip`].
//! Remote tabs are [`RemoteTabProxy`]s owned by a [`TabRouter`], which
//! rebinds them when their process dies. [`TabHost`] is the other end,
//! running inside each tab process.

pub mod control;
pub mod engine;
pub mod events;
pub mod host;
pub mod hub;
pub mod local;
pub mod remote;
pub mod router;
pub mod strip;
pub mod wire;

pub use control::{FindRequest, HighlightRequest, TabControl, TabKind, ZoomDirection};
pub use engine::{headless_factory, EngineFactory, EngineStatus, HeadlessEngine, TabEngine};
pub use events::TabEvent;
pub use host::{InProcessSpawner, TabHost};
pub use hub::NotificationHub;
pub use local::LocalTab;
pub use remote::{ProxyPhase, RemoteTabProxy};
pub use router::TabRouter;
pub use strip::{TabSlot, TabState, TabStrip};
pub use wire::{LogMessage, TabNotification, TabRequest};
