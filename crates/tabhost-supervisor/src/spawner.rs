//! Child process spawning.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tabhost_common::{NamespaceToken, SupervisorError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A started tab process and the pipes the channel talks over.
pub struct SpawnedProcess {
    pub process_id: u32,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// The OS handle, when there is a real process behind the pipes.
    pub child: Option<Child>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("process_id", &self.process_id)
            .field("child", &self.child.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Spawner: Send + Sync {
    /// Start one tab process. `main_namespace` is handed to the child so
    /// it knows which window it serves.
    async fn spawn(&self, main_namespace: &NamespaceToken)
        -> Result<SpawnedProcess, SupervisorError>;
}

// =============================================================================
// ENVIRONMENT SANITIZATION
// =============================================================================

/// Environment variables the child inherits. Everything else is dropped so
/// secrets in the parent environment do not leak into tab processes.
const ALLOWED_ENV_VARS: &[&str] = &[
    "HOME",
    "USER",
    "LOGNAME",
    "PATH",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "XDG_RUNTIME_DIR",
    "TMPDIR",
    "TMP",
    "TEMP",
    "RUST_LOG",
    // Windows-specific
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "SYSTEMROOT",
];

// =============================================================================
// SPAWN
// =============================================================================

/// Spawns `tabhost-plug` executables with piped stdio.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    executable: PathBuf,
}

impl CommandSpawner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Use `configured` or fall back to the `tabhost-plug` binary next to
    /// the running executable.
    pub fn from_config(configured: Option<&Path>) -> Result<Self, SupervisorError> {
        match configured {
            Some(path) => Ok(Self::new(path)),
            None => default_plug_executable().map(Self::new),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn build_command(&self, main_namespace: &NamespaceToken) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(main_namespace.as_str())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd
    }
}

pub fn default_plug_executable() -> Result<PathBuf, SupervisorError> {
    let current = std::env::current_exe()
        .map_err(|e| SupervisorError::SpawnFailure(format!("cannot locate executable: {e}")))?;
    Ok(current.with_file_name(format!("tabhost-plug{}", std::env::consts::EXE_SUFFIX)))
}

#[async_trait]
impl Spawner for CommandSpawner {
    async fn spawn(
        &self,
        main_namespace: &NamespaceToken,
    ) -> Result<SpawnedProcess, SupervisorError> {
        debug!(executable = %self.executable.display(), "spawning tab process");
        let mut child = self.build_command(main_namespace).spawn().map_err(|e| {
            SupervisorError::SpawnFailure(format!("{}: {e}", self.executable.display()))
        })?;

        let process_id = child
            .id()
            .ok_or_else(|| SupervisorError::SpawnFailure("child exited immediately".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailure("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailure("child stdout not piped".into()))?;

        info!(process_id, executable = %self.executable.display(), "tab process started");
        Ok(SpawnedProcess {
            process_id,
            stdout: Box::new(stdout),
            stdin: Box::new(stdin),
            child: Some(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabhost_common::encode_main_interface;

    #[test]
    fn allowed_env_vars_contains_essentials() {
        assert!(ALLOWED_ENV_VARS.contains(&"HOME"));
        assert!(ALLOWED_ENV_VARS.contains(&"PATH"));
        assert!(ALLOWED_ENV_VARS.contains(&"RUST_LOG"));
    }

    #[test]
    fn allowed_env_vars_excludes_secrets() {
        for var in ALLOWED_ENV_VARS {
            let lower = var.to_lowercase();
            for needle in ["key", "secret", "token", "password"] {
                assert!(!lower.contains(needle), "ALLOWED_ENV_VARS should not contain '{var}'");
            }
        }
    }

    #[test]
    fn default_executable_sits_next_to_current_exe() {
        let path = default_plug_executable().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("tabhost-plug"));
        assert_eq!(path.parent(), std::env::current_exe().unwrap().parent());
    }

    #[test]
    fn configured_executable_wins() {
        let spawner = CommandSpawner::from_config(Some(Path::new("/opt/tabhost/plug"))).unwrap();
        assert_eq!(spawner.executable(), Path::new("/opt/tabhost/plug"));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_failure() {
        let spawner = CommandSpawner::new("/nonexistent/tabhost-plug-missing");
        let err = spawner.spawn(&encode_main_interface(1)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailure(msg) if msg.contains("tabhost-plug-missing")));
    }
}
