//! Wire types for the daemon protocol.
//!
//! Every message is a JSON text frame. Clients send [`CallFrame`]s; the
//! daemon answers each one with a [`ServerFrame::Response`] carrying the
//! same id, and pushes [`ServerFrame::Broadcast`] frames whenever its
//! document changes, regardless of which client caused the change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ── Manifest slices ─────────────────────────────────────────────────

/// Dependencies managed by uv (PEP 508 requirement strings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvDependencies {
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// `requires-python` specifier, e.g. `">=3.10"`.
    #[serde(default)]
    pub requires_python: Option<String>,
}

/// Dependencies managed by conda.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaDependencies {
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub channels: Vec<String>,

    /// Pinned python version, e.g. `"3.11"`.
    #[serde(default)]
    pub python: Option<String>,
}

/// Full value of every tracked manifest.
///
/// `None` means the notebook has no manifest of that family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepsSnapshot {
    #[serde(default)]
    pub uv: Option<UvDependencies>,

    #[serde(default)]
    pub conda: Option<CondaDependencies>,
}

// ── Commands ────────────────────────────────────────────────────────

/// A named daemon command with its argument record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Request {
    /// Query the current value of every manifest.
    GetDeps,

    SetUvDeps {
        dependencies: Vec<String>,
        requires_python: Option<String>,
    },
    AddUvDep {
        package: String,
    },
    RemoveUvDep {
        package: String,
    },

    SetCondaDeps {
        dependencies: Vec<String>,
        channels: Vec<String>,
        python: Option<String>,
    },
    AddCondaDep {
        package: String,
    },
    RemoveCondaDep {
        package: String,
    },
}

impl Request {
    /// Wire name of the command, e.g. `"add_uv_dep"`.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Successful result of a daemon call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// Snapshot returned by [`Request::GetDeps`].
    Deps(DepsSnapshot),
    /// Acknowledgement of a mutation. The new state arrives as a broadcast.
    Done,
}

impl Reply {
    /// Extract the snapshot from a `get_deps` reply.
    pub fn into_snapshot(self, command: &str) -> Result<DepsSnapshot, Error> {
        match self {
            Self::Deps(snapshot) => Ok(snapshot),
            Self::Done => Err(Error::UnexpectedReply {
                command: command.to_owned(),
                expected: "a dependency snapshot",
            }),
        }
    }
}

// ── Broadcasts ──────────────────────────────────────────────────────

/// Change notification pushed by the daemon to every client.
///
/// Payloads carry complete values, never diffs. Events this client does
/// not track decode as [`DaemonBroadcast::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonBroadcast {
    /// One or more manifests changed; carries the new value of all of them.
    DepsChanged(DepsSnapshot),

    #[serde(other)]
    Other,
}

// ── Frames ──────────────────────────────────────────────────────────

/// Client-to-daemon frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub id: Uuid,
    pub call: Request,
}

/// Daemon-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to the call with the same `id`. Exactly one of `reply` and
    /// `error` is set.
    Response {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<Reply>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Broadcast {
        payload: DaemonBroadcast,
    },
}

impl ServerFrame {
    pub fn reply(id: Uuid, reply: Reply) -> Self {
        Self::Response {
            id,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn failure(id: Uuid, message: impl Into<String>) -> Self {
        Self::Response {
            id,
            reply: None,
            error: Some(message.into()),
        }
    }

    pub fn broadcast(payload: DaemonBroadcast) -> Self {
        Self::Broadcast { payload }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_names_match_wire_tags() {
        let request = Request::RemoveCondaDep {
            package: "scipy".into(),
        };
        assert_eq!(request.name(), "remove_conda_dep");
        assert_eq!(Request::GetDeps.name(), "get_deps");
    }

    #[test]
    fn call_frame_shape() {
        let frame = CallFrame {
            id: Uuid::nil(),
            call: Request::AddUvDep {
                package: "numpy".into(),
            },
        };

        insta::assert_json_snapshot!(frame, @r#"
        {
          "id": "00000000-0000-0000-0000-000000000000",
          "call": {
            "command": "add_uv_dep",
            "args": {
              "package": "numpy"
            }
          }
        }
        "#);
    }

    #[test]
    fn query_call_has_no_args() {
        let frame = CallFrame {
            id: Uuid::nil(),
            call: Request::GetDeps,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "00000000-0000-0000-0000-000000000000",
                "call": { "command": "get_deps" }
            })
        );

        let decoded: CallFrame = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn deps_reply_frame_shape() {
        let frame = ServerFrame::reply(
            Uuid::nil(),
            Reply::Deps(DepsSnapshot {
                uv: Some(UvDependencies {
                    dependencies: vec!["pandas>=2".into()],
                    requires_python: Some(">=3.10".into()),
                }),
                conda: None,
            }),
        );

        insta::assert_json_snapshot!(frame, @r#"
        {
          "type": "response",
          "id": "00000000-0000-0000-0000-000000000000",
          "reply": {
            "kind": "deps",
            "uv": {
              "dependencies": [
                "pandas>=2"
              ],
              "requires_python": ">=3.10"
            },
            "conda": null
          }
        }
        "#);
    }

    #[test]
    fn failure_frame_decodes() {
        let raw = json!({
            "type": "response",
            "id": "00000000-0000-0000-0000-000000000000",
            "error": "package name is invalid"
        });

        let frame: ServerFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame, ServerFrame::failure(Uuid::nil(), "package name is invalid"));
    }

    #[test]
    fn deps_changed_broadcast_decodes_null_slices() {
        let raw = json!({
            "type": "broadcast",
            "payload": {
                "event": "deps_changed",
                "uv": null,
                "conda": { "dependencies": ["scipy"], "channels": ["conda-forge"] }
            }
        });

        let frame: ServerFrame = serde_json::from_value(raw).unwrap();
        let expected = ServerFrame::broadcast(DaemonBroadcast::DepsChanged(DepsSnapshot {
            uv: None,
            conda: Some(CondaDependencies {
                dependencies: vec!["scipy".into()],
                channels: vec!["conda-forge".into()],
                python: None,
            }),
        }));
        assert_eq!(frame, expected);
    }

    #[test]
    fn unknown_broadcast_event_decodes_as_other() {
        let raw = json!({
            "event": "kernel_status",
            "status": "busy"
        });

        let broadcast: DaemonBroadcast = serde_json::from_value(raw).unwrap();
        assert_eq!(broadcast, DaemonBroadcast::Other);
    }

    #[test]
    fn done_reply_is_not_a_snapshot() {
        let err = Reply::Done.into_snapshot("get_deps").unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { .. }));
    }
}
