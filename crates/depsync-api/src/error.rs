use thiserror::Error;

/// Top-level error type for the `depsync-api` crate.
///
/// Covers every failure mode of the daemon transports: connection
/// lifecycle, remote rejections, and protocol decoding. `depsync-core`
/// folds these into the structured error kinds it exposes to consumers.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// No live connection to the daemon; the call was never sent.
    #[error("not connected to the daemon")]
    NotConnected,

    /// The connection dropped while the call was in flight. The daemon may
    /// or may not have applied it.
    #[error("connection to the daemon was lost before `{command}` completed")]
    Disconnected { command: String },

    /// WebSocket handshake or stream failure.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The call did not complete within the configured timeout.
    #[error("daemon call `{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The client was shut down.
    #[error("daemon client has been shut down")]
    Shutdown,

    // ── Remote ──────────────────────────────────────────────────────
    /// The daemon received the call and reported a failure.
    #[error("daemon rejected `{command}`: {message}")]
    Remote { command: String, message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The daemon answered with a reply of the wrong shape.
    #[error("unexpected reply to `{command}`: expected {expected}")]
    UnexpectedReply {
        command: String,
        expected: &'static str,
    },

    /// JSON encoding or decoding failed.
    #[error("malformed frame: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Whether this failure means the daemon could not be reached, as
    /// opposed to the daemon answering with a failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Disconnected { .. }
                | Self::WebSocketConnect(_)
                | Self::Timeout { .. }
                | Self::Shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_classification() {
        assert!(Error::NotConnected.is_connectivity());
        assert!(
            Error::Disconnected {
                command: "add_uv_dep".into()
            }
            .is_connectivity()
        );
        assert!(
            !Error::Remote {
                command: "add_uv_dep".into(),
                message: "invalid requirement".into()
            }
            .is_connectivity()
        );
    }
}
