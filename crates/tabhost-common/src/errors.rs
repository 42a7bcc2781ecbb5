use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// A serialized history that could not be decoded. Callers treat the tab
/// as blank instead of propagating.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("malformed history: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("peer process {process_id} is unavailable")]
    PeerUnavailable { process_id: u32 },

    #[error("channel protocol error: {0}")]
    Protocol(String),

    #[error("handler already registered for {namespace}/{method}")]
    DuplicateHandler { namespace: String, method: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("remote error: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn tab process: {0}")]
    SpawnFailure(String),

    #[error("tab process {0} never became ready")]
    NotReady(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session record {index} could not be decoded: {reason}")]
    Decode { index: usize, reason: String },

    #[error("session is not a JSON array: {0}")]
    NotASession(String),

    #[error("session could not be encoded: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TabError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("tab is closed")]
    Closed,

    #[error("tab is reconnecting to its process")]
    Reconnecting,

    #[error("socket id {0} is already in use")]
    DuplicateSocket(u64),

    #[error("unexpected reply: {0}")]
    BadReply(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TabhostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tab(#[from] TabError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ValidationError("query_timeout_ms out of range".into());
        assert_eq!(
            err.to_string(),
            "config validation error: query_timeout_ms out of range"
        );
    }

    #[test]
    fn channel_error_display() {
        let err = ChannelError::PeerUnavailable { process_id: 42 };
        assert_eq!(err.to_string(), "peer process 42 is unavailable");

        let err = ChannelError::DuplicateHandler {
            namespace: "org.tabhost.tab7".into(),
            method: "send_title".into(),
        };
        assert_eq!(
            err.to_string(),
            "handler already registered for org.tabhost.tab7/send_title"
        );
    }

    #[test]
    fn session_decode_error_names_the_record() {
        let err = SessionError::Decode {
            index: 3,
            reason: "unknown state 'X'".into(),
        };
        assert_eq!(
            err.to_string(),
            "session record 3 could not be decoded: unknown state 'X'"
        );
    }

    #[test]
    fn tab_error_wraps_channel_error() {
        let err: TabError = ChannelError::PeerUnavailable { process_id: 9 }.into();
        assert!(matches!(
            err,
            TabError::Channel(ChannelError::PeerUnavailable { process_id: 9 })
        ));
    }

    #[test]
    fn tabhost_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TabhostError = io_err.into();
        assert!(matches!(err, TabhostError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn tabhost_error_from_supervisor() {
        let err: TabhostError = SupervisorError::SpawnFailure("no such file".into()).into();
        assert!(matches!(err, TabhostError::Supervisor(_)));
        assert_eq!(err.to_string(), "failed to spawn tab process: no such file");
    }
}
