//! Command handlers and the daemon session they share.

pub mod config_cmd;
pub mod deps;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use depsync_api::{ConnectionState, DaemonClient, Error as ApiError};
use depsync_config::Config;
use depsync_core::{DepsController, SyncError};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Config resolution ────────────────────────────────────────────────

/// Load the config file (from `--config` or the platform default) and
/// apply flag overrides on top.
pub fn resolve_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(depsync_config::config_path);
    let mut config: Config = depsync_config::figment_for(&path)
        .extract()
        .map_err(depsync_config::ConfigError::from)?;

    if let Some(url) = &global.url {
        config.daemon.url.clone_from(url);
    }
    if let Some(secs) = global.timeout {
        config.daemon.call_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

// ── Daemon session ───────────────────────────────────────────────────

/// A connected client with an active controller on top.
pub struct Session {
    pub controller: DepsController,
    client: Arc<DaemonClient>,
    url: String,
    settle_timeout: Duration,
}

impl Session {
    /// Connect to the daemon and activate a controller.
    ///
    /// One-shot commands give up after the first failed connection
    /// attempt. A `persistent` session keeps the configured reconnect
    /// policy and tolerates a daemon that is not up yet.
    pub async fn open(config: &Config, persistent: bool) -> Result<Self, CliError> {
        let mut client_config = config.client_config()?;
        if !persistent {
            client_config.reconnect.max_retries = Some(0);
        }
        let url = client_config.url.to_string();
        let connect_timeout = client_config.call_timeout;

        let client = Arc::new(DaemonClient::connect(client_config));
        match client.wait_connected(connect_timeout).await {
            Ok(()) => {}
            Err(err) if persistent => {
                tracing::warn!(%url, error = %err, "daemon not reachable yet, waiting");
            }
            Err(err) => {
                client.shutdown();
                return Err(connect_error(err, &url, connect_timeout));
            }
        }

        let controller = DepsController::with_client(Arc::clone(&client), config.controller_config());
        if let Err(err) = controller.activate().await {
            client.shutdown();
            return Err(CliError::from_core(err, &url));
        }
        tracing::debug!(%url, "session open");

        Ok(Self {
            controller,
            client,
            url,
            settle_timeout: config.settle_timeout(),
        })
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    /// Resolves once the client has used up its reconnect attempts. Never
    /// resolves after the client is shut down.
    pub async fn connection_failed(&self) {
        let mut state = self.client.connection_state();
        if state
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }

    /// The error reported when the daemon connection is gone for good.
    pub fn connection_lost(&self) -> CliError {
        CliError::ConnectionFailed {
            url: self.url.clone(),
            source: Box::new(ApiError::NotConnected),
        }
    }

    pub fn fail(&self, err: SyncError) -> CliError {
        CliError::from_sync(err, &self.url)
    }

    /// Surface an initial fetch that failed silently during activation.
    pub async fn ensure_loaded(&self) -> Result<(), CliError> {
        let loaded = self.controller.uv_state().loaded && self.controller.conda_state().loaded;
        if loaded {
            return Ok(());
        }
        self.controller.refresh().await.map_err(|e| self.fail(e))
    }

    pub async fn close(self) {
        self.controller.deactivate().await;
        self.client.shutdown();
        tracing::debug!(url = %self.url, "session closed");
    }
}

fn connect_error(err: ApiError, url: &str, timeout: Duration) -> CliError {
    match err {
        ApiError::Timeout { .. } => CliError::Timeout {
            url: url.to_owned(),
            seconds: timeout.as_secs(),
        },
        other => CliError::ConnectionFailed {
            url: url.to_owned(),
            source: Box::new(other),
        },
    }
}
