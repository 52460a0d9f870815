// ── Mutation commands ──
//
// Every write a client can request flows through the `Mutation` enum. The
// controller validates it locally, then hands the wire form to the command
// channel. A mutation never touches the cache.

use depsync_api::Request;
use serde::Serialize;

use crate::model::SliceKind;

/// A request to change one slice on the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    // ── uv ───────────────────────────────────────────────────────────
    SetUv {
        dependencies: Vec<String>,
        requires_python: Option<String>,
    },
    AddUv {
        package: String,
    },
    RemoveUv {
        package: String,
    },

    // ── conda ────────────────────────────────────────────────────────
    SetConda {
        dependencies: Vec<String>,
        channels: Vec<String>,
        python: Option<String>,
    },
    AddConda {
        package: String,
    },
    RemoveConda {
        package: String,
    },
}

/// Shape of a mutation, independent of its slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MutationKind {
    SetAll,
    AddOne,
    RemoveOne,
}

/// What happened to a mutation handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Exactly one call went out and the daemon acknowledged it.
    Sent,
    /// Trivially invalid input; nothing was sent and no state changed.
    Skipped,
}

impl Mutation {
    pub fn slice(&self) -> SliceKind {
        match self {
            Self::SetUv { .. } | Self::AddUv { .. } | Self::RemoveUv { .. } => SliceKind::Uv,
            Self::SetConda { .. } | Self::AddConda { .. } | Self::RemoveConda { .. } => {
                SliceKind::Conda
            }
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Self::SetUv { .. } | Self::SetConda { .. } => MutationKind::SetAll,
            Self::AddUv { .. } | Self::AddConda { .. } => MutationKind::AddOne,
            Self::RemoveUv { .. } | Self::RemoveConda { .. } => MutationKind::RemoveOne,
        }
    }

    /// Apply local validation.
    ///
    /// Single-package operations carry the trimmed identifier; `None` when
    /// it is empty after trimming. Set-all operations pass through as-is.
    pub fn normalized(self) -> Option<Self> {
        fn trimmed(package: &str) -> Option<String> {
            let package = package.trim();
            (!package.is_empty()).then(|| package.to_owned())
        }

        Some(match self {
            Self::AddUv { package } => Self::AddUv {
                package: trimmed(&package)?,
            },
            Self::RemoveUv { package } => Self::RemoveUv {
                package: trimmed(&package)?,
            },
            Self::AddConda { package } => Self::AddConda {
                package: trimmed(&package)?,
            },
            Self::RemoveConda { package } => Self::RemoveConda {
                package: trimmed(&package)?,
            },
            set @ (Self::SetUv { .. } | Self::SetConda { .. }) => set,
        })
    }

    pub fn into_request(self) -> Request {
        match self {
            Self::SetUv {
                dependencies,
                requires_python,
            } => Request::SetUvDeps {
                dependencies,
                requires_python,
            },
            Self::AddUv { package } => Request::AddUvDep { package },
            Self::RemoveUv { package } => Request::RemoveUvDep { package },
            Self::SetConda {
                dependencies,
                channels,
                python,
            } => Request::SetCondaDeps {
                dependencies,
                channels,
                python,
            },
            Self::AddConda { package } => Request::AddCondaDep { package },
            Self::RemoveConda { package } => Request::RemoveCondaDep { package },
        }
    }
}
