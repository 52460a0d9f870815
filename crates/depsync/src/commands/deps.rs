//! One-shot dependency commands: show, add, remove, set, refresh.
//!
//! Edits are fire-and-observe: the handler sends the mutation, then waits
//! (bounded by `controller.settle_timeout_secs`) for the daemon's broadcast
//! to land in the cache before printing the converged state.

use std::time::Duration;

use depsync_config::Config;
use depsync_core::{Dispatch, Mutation, SliceKind, SliceStream};

use crate::cli::{GlobalOpts, Manager, PackageArgs, SetTarget};
use crate::commands::Session;
use crate::error::CliError;
use crate::output::{self, DepsView};

/// What a one-shot command does once the session is open.
pub enum Action {
    Show,
    Refresh,
    Edit(Mutation),
}

impl Action {
    pub fn add(args: &PackageArgs) -> Result<Self, CliError> {
        let package = require_package(&args.package)?;
        Ok(Self::Edit(match args.manager {
            Manager::Uv => Mutation::AddUv { package },
            Manager::Conda => Mutation::AddConda { package },
        }))
    }

    pub fn remove(args: &PackageArgs) -> Result<Self, CliError> {
        let package = require_package(&args.package)?;
        Ok(Self::Edit(match args.manager {
            Manager::Uv => Mutation::RemoveUv { package },
            Manager::Conda => Mutation::RemoveConda { package },
        }))
    }

    pub fn set(target: SetTarget) -> Self {
        Self::Edit(match target {
            SetTarget::Uv {
                dependencies,
                requires_python,
            } => Mutation::SetUv {
                dependencies,
                requires_python,
            },
            SetTarget::Conda {
                dependencies,
                channels,
                python,
            } => Mutation::SetConda {
                dependencies,
                channels,
                python,
            },
        })
    }
}

fn require_package(package: &str) -> Result<String, CliError> {
    let trimmed = package.trim();
    if trimmed.is_empty() {
        return Err(CliError::Validation {
            field: "package".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(trimmed.to_owned())
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(action: Action, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(config, false).await?;
    let result = run(&session, action).await;
    let view = DepsView::capture(&session.controller);
    session.close().await;
    result?;

    let color = output::should_color(global.color);
    output::print_output(&output::render_view(global.output, &view, color), global.quiet);
    Ok(())
}

async fn run(session: &Session, action: Action) -> Result<(), CliError> {
    match action {
        Action::Show => session.ensure_loaded().await,
        Action::Refresh => session
            .controller
            .refresh()
            .await
            .map_err(|e| session.fail(e)),
        Action::Edit(mutation) => edit(session, mutation).await,
    }
}

async fn edit(session: &Session, mutation: Mutation) -> Result<(), CliError> {
    session.ensure_loaded().await?;

    let controller = &session.controller;
    let slice = mutation.slice();
    let kind = mutation.kind();

    // Streams are taken before sending so the broadcast can't slip past.
    let settled = match slice {
        SliceKind::Uv => {
            let stream = controller.uv_stream();
            send(session, mutation).await?;
            wait_for_broadcast(stream, session.settle_timeout()).await
        }
        SliceKind::Conda => {
            let stream = controller.conda_stream();
            send(session, mutation).await?;
            wait_for_broadcast(stream, session.settle_timeout()).await
        }
    };

    if settled {
        tracing::info!(%slice, %kind, "change confirmed by daemon broadcast");
    } else {
        tracing::warn!(
            %slice,
            %kind,
            timeout_secs = session.settle_timeout().as_secs(),
            "command accepted but no broadcast arrived; showing last known state"
        );
    }
    Ok(())
}

async fn send(session: &Session, mutation: Mutation) -> Result<(), CliError> {
    match session.controller.mutate(mutation).await {
        Ok(Dispatch::Sent) => Ok(()),
        Ok(Dispatch::Skipped) => Err(CliError::Validation {
            field: "package".into(),
            reason: "must not be empty".into(),
        }),
        Err(e) => Err(session.fail(e)),
    }
}

async fn wait_for_broadcast<T: Clone + Send + Sync + 'static>(
    mut stream: SliceStream<T>,
    timeout: Duration,
) -> bool {
    let revision = stream.current().revision;
    tokio::time::timeout(timeout, stream.wait_for(|s| s.revision > revision))
        .await
        .is_ok_and(|state| state.is_some())
}
