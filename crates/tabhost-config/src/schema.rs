//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for tabhost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TabhostConfig {
    pub channel: ChannelConfig,
    pub supervisor: SupervisorConfig,
    pub session: SessionConfig,
    pub closed_tabs: ClosedTabsConfig,
    pub logging: LoggingConfig,
}

/// Message channel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Upper bound on waiting for a query reply from a live peer
    /// (valid range: 1-120000).
    pub query_timeout_ms: u32,
    /// Longest accepted frame line in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5000,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Child process spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Path to the `tabhost-plug` executable. Defaults to the binary next
    /// to the running `tabhost`.
    pub plug_executable: Option<PathBuf>,
    /// How long a freshly spawned child has to announce itself.
    pub spawn_ready_timeout_ms: u32,
    /// How long a released child may take to exit before it is killed
    /// (valid range: 0-60000).
    pub reap_grace_ms: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            plug_executable: None,
            spawn_ready_timeout_ms: 5000,
            reap_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session file. `None` uses `<data dir>/tabhost/tabs.json`.
    pub file: Option<PathBuf>,
    /// Seconds between automatic saves, 0 disables (valid range: 0-3600).
    pub autosave_interval_secs: u32,
    pub restore_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: None,
            autosave_interval_secs: 30,
            restore_on_start: true,
        }
    }
}

impl SessionConfig {
    /// Resolve the session file location.
    pub fn resolved_file(&self) -> Option<PathBuf> {
        self.file
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("tabhost").join("tabs.json")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosedTabsConfig {
    /// How many closed tabs to remember (valid range: 1-500).
    pub capacity: u32,
}

impl Default for ClosedTabsConfig {
    fn default() -> Self {
        Self { capacity: 25 }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = TabhostConfig::default();
        assert_eq!(config.channel.query_timeout_ms, 5000);
        assert_eq!(config.supervisor.spawn_ready_timeout_ms, 5000);
        assert_eq!(config.supervisor.reap_grace_ms, 2000);
        assert!(config.supervisor.plug_executable.is_none());
        assert_eq!(config.session.autosave_interval_secs, 30);
        assert!(config.session.restore_on_start);
        assert_eq!(config.closed_tabs.capacity, 25);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn explicit_session_file_wins() {
        let session = SessionConfig {
            file: Some(PathBuf::from("/tmp/my-tabs.json")),
            ..Default::default()
        };
        assert_eq!(
            session.resolved_file(),
            Some(PathBuf::from("/tmp/my-tabs.json"))
        );
    }

    #[test]
    fn log_level_deserializes_lowercase() {
        let logging: LoggingConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(logging.level, LogLevel::Debug);
        assert_eq!(logging.level.as_str(), "debug");
    }
}
