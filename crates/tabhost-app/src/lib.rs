//! The main process: one browser window over local and remote tabs.

pub mod window;

pub use window::BrowserWindow;
