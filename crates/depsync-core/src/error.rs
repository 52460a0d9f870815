// ── Core error types ──
//
// `SyncError` is what the cache records and what operations return: a
// structured kind plus a human-readable detail, so consumers can tell an
// unreachable daemon from a rejected command without parsing strings.
// `CoreError` covers controller lifecycle misuse.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The daemon could not be reached or the call's outcome is unknown.
    Connectivity,
    /// The daemon answered with a failure, or with something unusable.
    Remote,
    /// Input was rejected locally before anything was sent.
    Validation,
}

/// Failure of a refresh or mutation, as recorded in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncError {
    pub kind: ErrorKind,
    pub detail: Option<String>,
}

impl SyncError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn connectivity(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connectivity, detail)
    }

    pub fn remote(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    /// The operation needs an active controller and there is none.
    pub fn inactive() -> Self {
        Self::connectivity("controller is not active")
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.detail, self.kind) {
            (Some(detail), _) => f.write_str(detail),
            (None, ErrorKind::Connectivity) => f.write_str("daemon unreachable"),
            (None, ErrorKind::Remote) => f.write_str("daemon reported a failure"),
            (None, ErrorKind::Validation) => f.write_str("invalid input"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<&depsync_api::Error> for SyncError {
    fn from(err: &depsync_api::Error) -> Self {
        let kind = if err.is_connectivity() {
            ErrorKind::Connectivity
        } else {
            ErrorKind::Remote
        };
        Self::new(kind, err.to_string())
    }
}

impl From<depsync_api::Error> for SyncError {
    fn from(err: depsync_api::Error) -> Self {
        Self::from(&err)
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("controller is already active; deactivate it first")]
    AlreadyActive,

    // ── Wrapped ──────────────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] depsync_api::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl CoreError {
    /// Structured kind of this failure, for consumers that only care about
    /// the taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyActive => ErrorKind::Validation,
            Self::Transport(e) => SyncError::from(e).kind,
            Self::Sync(e) => e.kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_kinds() {
        let unreachable = SyncError::from(depsync_api::Error::NotConnected);
        assert_eq!(unreachable.kind, ErrorKind::Connectivity);

        let timeout = SyncError::from(depsync_api::Error::Timeout {
            command: "get_deps".into(),
            timeout_ms: 500,
        });
        assert_eq!(timeout.kind, ErrorKind::Connectivity);

        let rejected = SyncError::from(depsync_api::Error::Remote {
            command: "add_uv_dep".into(),
            message: "invalid requirement".into(),
        });
        assert_eq!(rejected.kind, ErrorKind::Remote);
        assert!(rejected.to_string().contains("invalid requirement"));

        let malformed = SyncError::from(depsync_api::Error::UnexpectedReply {
            command: "get_deps".into(),
            expected: "a dependency snapshot",
        });
        assert_eq!(malformed.kind, ErrorKind::Remote);
    }

    #[test]
    fn display_falls_back_to_kind() {
        let err = SyncError {
            kind: ErrorKind::Connectivity,
            detail: None,
        };
        assert_eq!(err.to_string(), "daemon unreachable");
        assert_eq!(SyncError::inactive().to_string(), "controller is not active");
    }

    #[test]
    fn core_error_kind() {
        assert_eq!(CoreError::AlreadyActive.kind(), ErrorKind::Validation);
        assert_eq!(
            CoreError::from(depsync_api::Error::Shutdown).kind(),
            ErrorKind::Connectivity
        );
    }
}
