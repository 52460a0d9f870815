//! CLI error types with miette diagnostics.
//!
//! Maps core, transport, and config failures into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use depsync_config::ConfigError;
use depsync_core::{CoreError, ErrorKind, SyncError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the depsync daemon at {url}")]
    #[diagnostic(
        code(depsync::connection_failed),
        help(
            "Check that the daemon is running and listening on this address.\n\
             Override it with --url or DEPSYNC_DAEMON__URL."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Timed out after {seconds}s waiting for the daemon at {url}")]
    #[diagnostic(
        code(depsync::timeout),
        help("Increase the timeout with --timeout or check daemon responsiveness.")
    )]
    Timeout { url: String, seconds: u64 },

    // ── Daemon ───────────────────────────────────────────────────────
    #[error("The daemon rejected the request: {message}")]
    #[diagnostic(
        code(depsync::rejected),
        help("Run `depsync show` to see the state the daemon currently holds.")
    )]
    Rejected { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(depsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(depsync::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(depsync::config),
        help("Check the config file shown by: depsync config path")
    )]
    Config(ConfigError),

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(depsync::internal))]
    Core(CoreError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } => exit_code::USAGE,
            Self::ConfigExists { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Core(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }

    /// Translate a failed refresh or mutation. Connectivity failures name
    /// the daemon `url` the session was opened against.
    pub fn from_sync(err: SyncError, url: &str) -> Self {
        match err.kind {
            ErrorKind::Connectivity => Self::ConnectionFailed {
                url: url.to_owned(),
                source: Box::new(err),
            },
            ErrorKind::Remote => Self::Rejected {
                message: err.to_string(),
            },
            ErrorKind::Validation => Self::Validation {
                field: "package".into(),
                reason: err.to_string(),
            },
        }
    }

    /// Translate a controller lifecycle failure.
    pub fn from_core(err: CoreError, url: &str) -> Self {
        match err {
            CoreError::Sync(e) => Self::from_sync(e, url),
            CoreError::Transport(e) => Self::from_sync(SyncError::from(e), url),
            other => Self::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_kinds_map_to_exit_codes() {
        let url = "ws://127.0.0.1:1";
        assert_eq!(
            CliError::from_sync(SyncError::connectivity("gone"), url).exit_code(),
            exit_code::CONNECTION
        );
        assert_eq!(
            CliError::from_sync(SyncError::remote("no"), url).exit_code(),
            exit_code::REJECTED
        );
        assert_eq!(
            CliError::from_sync(SyncError::validation("empty"), url).exit_code(),
            exit_code::USAGE
        );
        assert_eq!(
            CliError::from_core(CoreError::AlreadyActive, url).exit_code(),
            exit_code::GENERAL
        );
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "daemon.url".into(),
            reason: "bad scheme".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
        assert_eq!(err.to_string(), "Invalid value for daemon.url: bad scheme");
    }
}
