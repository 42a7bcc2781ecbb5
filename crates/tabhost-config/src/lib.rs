//! tabhost configuration system.
//!
//! TOML-based configuration with full validation. All sections use
//! defaults so partial configs work out of the box.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigSource;
pub use schema::{
    ChannelConfig, ClosedTabsConfig, LogLevel, LoggingConfig, SessionConfig, SupervisorConfig,
    TabhostConfig,
};

use std::path::Path;
use tabhost_common::ConfigError;
use tracing::info;

/// Load config from `path` when given, otherwise from the platform default
/// location. This is the only place a config is validated.
pub fn load_config(path: Option<&Path>) -> Result<TabhostConfig, ConfigError> {
    let source = ConfigSource::locate(path)?;
    let config = source.read()?;
    validation::validate(&config)?;
    info!(path = %source.path().display(), "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_with_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabhost.toml");
        std::fs::write(&path, "[session]\nrestore_on_start = false\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(!config.session.restore_on_start);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabhost.toml");
        std::fs::write(&path, "[closed_tabs]\ncapacity = 0\n[supervisor]\nreap_grace_ms = 90000\n")
            .unwrap();

        let Err(ConfigError::ValidationError(message)) = load_config(Some(&path)) else {
            panic!("expected a validation error");
        };
        assert!(message.contains("closed_tabs.capacity"));
        assert!(message.contains("supervisor.reap_grace_ms"));
    }

    #[test]
    fn load_config_missing_explicit_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
