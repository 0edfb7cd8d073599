//! Unified error taxonomy for the daemon, worker, and CLI.
//!
//! Every internal library API returns `Result<T, AgoError>`. Binary entry
//! points widen to `anyhow::Result` only at the outermost `main`/`run`
//! function, where a known variant is mapped to a process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// The single error type shared by every component in the crate.
#[derive(Error, Debug)]
pub enum AgoError {
    // --- client-facing, recoverable -------------------------------------
    #[error("no such agent: {0}")]
    NoSuchAgent(String),

    #[error("ambiguous agent name {name:?}: matches {candidates:?}")]
    AmbiguousAgent { name: String, candidates: Vec<String> },

    #[error("no such template: {0}")]
    NoSuchTemplate(String),

    #[error("bad template {path:?}: {reason}")]
    BadTemplate { path: PathBuf, reason: String },

    #[error("queue full for instance {0}")]
    QueueFull(String),

    #[error("tool call to {tool:?} timed out after {deadline_ms}ms")]
    ToolTimeout { tool: String, deadline_ms: u64 },

    #[error("reasoner produced an unparseable reply: {0}")]
    ReasonerParseError(String),

    #[error("invalid config at {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("instance {0} is already running")]
    AlreadyRunning(String),

    #[error("instance {0} is not running")]
    NotRunning(String),

    // --- infrastructure ----------------------------------------------------
    #[error("socket I/O error on {path:?}: {source}")]
    SocketIO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode frame: {0}")]
    DecodeFailure(String),

    #[error("registry file corrupt at {path:?}: {reason}")]
    RegistryCorrupt { path: PathBuf, reason: String },

    #[error("failed to spawn worker for instance {instance}: {reason}")]
    SpawnFailed { instance: String, reason: String },

    #[error("worker for instance {0} crashed")]
    ChildCrashed(String),

    // --- fatal: daemon aborts ----------------------------------------------
    #[error("failed to bind control socket at {path:?}: {source}")]
    BindFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("base directory {path:?} is inaccessible: {source}")]
    BaseDirInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install {signal} handler: {source}")]
    SignalInstallFailed {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgoError {
    /// The broad bucket a variant falls into, mirroring the taxonomy.
    pub fn category(&self) -> ErrorCategory {
        use AgoError::*;
        match self {
            NoSuchAgent(_)
            | AmbiguousAgent { .. }
            | NoSuchTemplate(_)
            | BadTemplate { .. }
            | QueueFull(_)
            | ToolTimeout { .. }
            | ReasonerParseError(_)
            | ConfigInvalid { .. }
            | AlreadyRunning(_)
            | NotRunning(_) => ErrorCategory::ClientRecoverable,
            SocketIO { .. } | DecodeFailure(_) | RegistryCorrupt { .. } | SpawnFailed { .. }
            | ChildCrashed(_) => ErrorCategory::Infrastructure,
            BindFailed { .. } | BaseDirInaccessible { .. } | SignalInstallFailed { .. } => {
                ErrorCategory::Fatal
            }
            Io(_) | Yaml(_) | Json(_) => ErrorCategory::Infrastructure,
        }
    }

    /// The string the control server puts in a `Response{status:error}`
    /// envelope's `kind` field, matching the error-kind names in the
    /// error handling design verbatim.
    pub fn kind_name(&self) -> &'static str {
        use AgoError::*;
        match self {
            NoSuchAgent(_) => "NoSuchAgent",
            AmbiguousAgent { .. } => "AmbiguousAgent",
            NoSuchTemplate(_) => "NoSuchTemplate",
            BadTemplate { .. } => "BadTemplate",
            QueueFull(_) => "QueueFull",
            ToolTimeout { .. } => "ToolTimeout",
            ReasonerParseError(_) => "ReasonerParseError",
            ConfigInvalid { .. } => "ConfigInvalid",
            AlreadyRunning(_) => "AlreadyRunning",
            NotRunning(_) => "NotRunning",
            SocketIO { .. } => "SocketIO",
            DecodeFailure(_) => "DecodeFailure",
            RegistryCorrupt { .. } => "RegistryCorrupt",
            SpawnFailed { .. } => "SpawnFailed",
            ChildCrashed(_) => "ChildCrashed",
            BindFailed { .. } => "BindFailed",
            BaseDirInaccessible { .. } => "BaseDirInaccessible",
            SignalInstallFailed { .. } => "SignalInstallFailed",
            Io(_) => "SocketIO",
            Yaml(_) => "ConfigInvalid",
            Json(_) => "DecodeFailure",
        }
    }

    /// Whether this error should abort the daemon process entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Fatal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ClientRecoverable,
    Infrastructure,
    Fatal,
}

pub type AgoResult<T> = Result<T, AgoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_fatal() {
        let err = AgoError::NoSuchAgent("researcher-deadbeef".into());
        assert_eq!(err.category(), ErrorCategory::ClientRecoverable);
        assert!(!err.is_fatal());
        assert_eq!(err.kind_name(), "NoSuchAgent");
    }

    #[test]
    fn signal_install_failed_is_fatal() {
        let err = AgoError::SignalInstallFailed {
            signal: "SIGTERM",
            source: std::io::Error::new(std::io::ErrorKind::Other, "nope"),
        };
        assert_eq!(err.category(), ErrorCategory::Fatal);
        assert!(err.is_fatal());
        assert_eq!(err.kind_name(), "SignalInstallFailed");
    }

    #[test]
    fn bind_failed_is_fatal() {
        let err = AgoError::BindFailed {
            path: PathBuf::from("/root/.ago/daemon.sock"),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.category(), ErrorCategory::Fatal);
        assert!(err.is_fatal());
    }

    #[test]
    fn ambiguous_agent_lists_candidates() {
        let err = AgoError::AmbiguousAgent {
            name: "helper".into(),
            candidates: vec!["helper-aaaa1111".into(), "helper-bbbb2222".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("helper-aaaa1111"));
        assert!(msg.contains("helper-bbbb2222"));
    }
}
