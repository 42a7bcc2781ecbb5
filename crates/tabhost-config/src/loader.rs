//! Locating and reading the config file.
//!
//! Relative paths inside the file are anchored on the directory holding
//! it.

use crate::schema::TabhostConfig;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tabhost_common::ConfigError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Given with `--config`. Must exist.
    Explicit(PathBuf),
    /// `<config dir>/tabhost/config.toml`, seeded with a template on first
    /// run.
    Platform(PathBuf),
}

impl ConfigSource {
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Ok(Self::Explicit(path.to_path_buf())),
            None => {
                let dir = dirs::config_dir().ok_or_else(|| {
                    ConfigError::ParseError("could not determine config directory".into())
                })?;
                Ok(Self::Platform(dir.join("tabhost").join("config.toml")))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Platform(path) => path,
        }
    }

    /// Parse the file without validating it.
    pub fn read(&self) -> Result<TabhostConfig, ConfigError> {
        let path = self.path();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return match self {
                    Self::Explicit(_) => Err(ConfigError::FileNotFound(path.to_path_buf())),
                    Self::Platform(_) => {
                        seed_template(path);
                        Ok(TabhostConfig::default())
                    }
                };
            }
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let mut config = parse(&content)?;
        if let Some(base) = path.parent() {
            anchor_paths(&mut config, base);
        }
        debug!(path = %path.display(), "config file read");
        Ok(config)
    }
}

pub fn parse(content: &str) -> Result<TabhostConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("invalid TOML: {e}")))
}

/// `session.file` is always a path. `supervisor.plug_executable` is left
/// alone when it is a bare program name, which is looked up on `PATH`.
fn anchor_paths(config: &mut TabhostConfig, base: &Path) {
    if let Some(file) = config.session.file.as_mut() {
        if file.is_relative() {
            *file = base.join(&*file);
        }
    }
    if let Some(plug) = config.supervisor.plug_executable.as_mut() {
        if plug.is_relative() && plug.components().count() > 1 {
            *plug = base.join(&*plug);
        }
    }
}

/// Failure is logged, not returned.
fn seed_template(path: &Path) {
    let written = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, TEMPLATE));
    match written {
        Ok(()) => info!(path = %path.display(), "wrote config template"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not write config template"),
    }
}

const TEMPLATE: &str = r##"# tabhost configuration
# Every key is optional. Relative paths are relative to this file.

[channel]
# query_timeout_ms = 5000        # 1-120000, upper bound on any reply
# max_frame_bytes = 4194304

[supervisor]
# plug_executable = "tabhost-plug"  # bare names are looked up on PATH
# spawn_ready_timeout_ms = 5000
# reap_grace_ms = 2000           # 0-60000, then the child is killed

[session]
# file = "tabs.json"
# autosave_interval_secs = 30    # 0 disables
# restore_on_start = true

[closed_tabs]
# capacity = 25                  # 1-500

[logging]
# level = "info"                 # trace, debug, info, warn, error
"##;
