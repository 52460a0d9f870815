// ── Reconciliation controller ──
//
// Owns the broadcast subscription and the client cache for one session.
// Cache values change only through snapshot fetches and daemon broadcasts;
// command calls only move the pending/error state of their slice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use depsync_api::{
    BroadcastChannel, CommandChannel, DaemonBroadcast, DaemonClient, Notification, Request,
    Subscription, SubscriptionHandle,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{Dispatch, Mutation};
use crate::config::ControllerConfig;
use crate::error::{CoreError, SyncError};
use crate::model::{CondaDependencies, SliceKind, UvDependencies};
use crate::store::{ClientCache, SliceState};
use crate::stream::SliceStream;

/// Why a snapshot is being fetched. Decides how failures surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
enum FetchMode {
    /// Right after activation; the daemon may not be reachable yet.
    Initial,
    /// Caller-driven retry; failures are recorded on every slice.
    Refresh,
    /// The broadcast channel reported possibly missed notifications.
    Resync,
}

// ── DepsController ───────────────────────────────────────────────

/// Client-side view of the daemon's dependency manifests.
///
/// Cheaply cloneable via `Arc<ControllerInner>`; every clone drives the
/// same session and cache. Each UI surface that needs the manifests should
/// own its own controller and rely on broadcasts for cross-instance
/// consistency.
#[derive(Clone)]
pub struct DepsController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    commands: Arc<dyn CommandChannel>,
    broadcasts: Arc<dyn BroadcastChannel>,
    cache: ClientCache,
    /// Epoch of the running session, `0` while inactive.
    active_epoch: AtomicU64,
    next_epoch: AtomicU64,
    session: Mutex<Option<Session>>,
}

/// Resources held between `activate` and `deactivate`.
struct Session {
    epoch: u64,
    cancel: CancellationToken,
    subscription: SubscriptionHandle,
    listener: JoinHandle<()>,
}

impl DepsController {
    pub fn new(
        commands: Arc<dyn CommandChannel>,
        broadcasts: Arc<dyn BroadcastChannel>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                config,
                commands,
                broadcasts,
                cache: ClientCache::new(),
                active_epoch: AtomicU64::new(0),
                next_epoch: AtomicU64::new(0),
                session: Mutex::new(None),
            }),
        }
    }

    /// Build a controller over a transport that implements both channels.
    pub fn with_transport<T>(transport: Arc<T>, config: ControllerConfig) -> Self
    where
        T: CommandChannel + BroadcastChannel + 'static,
    {
        let commands: Arc<dyn CommandChannel> = transport.clone();
        let broadcasts: Arc<dyn BroadcastChannel> = transport;
        Self::new(commands, broadcasts, config)
    }

    /// Build a controller over a WebSocket daemon connection.
    pub fn with_client(client: Arc<DaemonClient>, config: ControllerConfig) -> Self {
        Self::with_transport(client, config)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start a session: subscribe to broadcasts, then fetch the initial
    /// snapshot.
    ///
    /// The cache starts out UNINITIALIZED. A failed initial fetch is logged
    /// and otherwise ignored; the first broadcast or a later
    /// [`refresh`](Self::refresh) will populate the cache.
    pub async fn activate(&self) -> Result<(), CoreError> {
        let epoch = {
            let mut session = self.inner.session.lock().await;
            if session.is_some() {
                return Err(CoreError::AlreadyActive);
            }

            let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.cache.reset(epoch);

            let subscription = match self.inner.broadcasts.subscribe() {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(label = %self.inner.config.label, error = %e, "broadcast subscribe failed");
                    self.inner.cache.reset(0);
                    return Err(e.into());
                }
            };

            let cancel = CancellationToken::new();
            let handle = subscription.handle();
            let listener = tokio::spawn(listen(
                Arc::downgrade(&self.inner),
                epoch,
                subscription,
                cancel.clone(),
            ));

            self.inner.active_epoch.store(epoch, Ordering::SeqCst);
            *session = Some(Session {
                epoch,
                cancel,
                subscription: handle,
                listener,
            });
            epoch
        };

        info!(label = %self.inner.config.label, epoch, "controller activated");

        // Failures here are connectivity noise, never user-facing.
        let _ = self.inner.fetch_snapshot(epoch, FetchMode::Initial).await;
        Ok(())
    }

    /// End the session: stop broadcast delivery and discard the cache.
    ///
    /// Idempotent. Calls still in flight complete normally but can no
    /// longer write to the cache.
    pub async fn deactivate(&self) {
        let mut guard = self.inner.session.lock().await;
        let Some(session) = guard.take() else {
            trace!(label = %self.inner.config.label, "deactivate on inactive controller");
            return;
        };

        self.inner.active_epoch.store(0, Ordering::SeqCst);
        session.subscription.unsubscribe();
        session.cancel.cancel();
        if session.listener.await.is_err_and(|e| e.is_panic()) {
            warn!(label = %self.inner.config.label, "broadcast listener panicked");
        }
        self.inner.cache.reset(0);

        info!(label = %self.inner.config.label, epoch = session.epoch, "controller deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active_epoch.load(Ordering::SeqCst) != 0
    }

    // ── Operations ───────────────────────────────────────────────

    /// Re-fetch every slice.
    ///
    /// On success every slice is replaced and its error cleared. On failure
    /// every slice keeps its last good value and records the error.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let epoch = self.require_active()?;

        let uv = self.inner.cache.begin(SliceKind::Uv, epoch);
        let conda = self.inner.cache.begin(SliceKind::Conda, epoch);

        let result = self.inner.fetch_snapshot(epoch, FetchMode::Refresh).await;
        let error = result.as_ref().err();
        uv.settle(error.cloned());
        conda.settle(error.cloned());
        result
    }

    /// Send one mutation to the daemon.
    ///
    /// Trivially invalid input is skipped without touching any state. The
    /// cached value is never changed here: the daemon's broadcast carries
    /// the outcome. A failure is both recorded on the slice and returned.
    pub async fn mutate(&self, mutation: Mutation) -> Result<Dispatch, SyncError> {
        let kind = mutation.kind();
        let Some(mutation) = mutation.normalized() else {
            debug!(%kind, "skipping mutation with empty package name");
            return Ok(Dispatch::Skipped);
        };
        let epoch = self.require_active()?;

        let slice = mutation.slice();
        let request = mutation.into_request();
        let command = request.name();

        let in_flight = self.inner.cache.begin(slice, epoch);
        debug!(%slice, command, epoch, "sending mutation");

        match self.inner.commands.call(request).await {
            Ok(_) => {
                in_flight.settle(None);
                Ok(Dispatch::Sent)
            }
            Err(e) => {
                let error = SyncError::from(&e);
                warn!(%slice, command, error = %e, "mutation failed");
                in_flight.settle(Some(error.clone()));
                Err(error)
            }
        }
    }

    // ── uv ───────────────────────────────────────────────────────

    pub async fn set_uv_deps(
        &self,
        dependencies: Vec<String>,
        requires_python: Option<String>,
    ) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::SetUv {
            dependencies,
            requires_python,
        })
        .await
    }

    pub async fn add_uv_dep(&self, package: impl Into<String>) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::AddUv {
            package: package.into(),
        })
        .await
    }

    pub async fn remove_uv_dep(&self, package: impl Into<String>) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::RemoveUv {
            package: package.into(),
        })
        .await
    }

    pub fn uv_deps(&self) -> Option<Arc<UvDependencies>> {
        self.inner.cache.uv().value
    }

    /// The cached uv manifest declares at least one dependency.
    pub fn has_uv_deps(&self) -> bool {
        self.inner.cache.uv().has_entries()
    }

    pub fn uv_state(&self) -> SliceState<UvDependencies> {
        self.inner.cache.uv()
    }

    pub fn uv_pending(&self) -> bool {
        self.inner.cache.uv().pending()
    }

    pub fn uv_error(&self) -> Option<SyncError> {
        self.inner.cache.uv().error
    }

    pub fn uv_stream(&self) -> SliceStream<UvDependencies> {
        SliceStream::new(self.inner.cache.subscribe_uv())
    }

    // ── conda ────────────────────────────────────────────────────

    pub async fn set_conda_deps(
        &self,
        dependencies: Vec<String>,
        channels: Vec<String>,
        python: Option<String>,
    ) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::SetConda {
            dependencies,
            channels,
            python,
        })
        .await
    }

    pub async fn add_conda_dep(&self, package: impl Into<String>) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::AddConda {
            package: package.into(),
        })
        .await
    }

    pub async fn remove_conda_dep(
        &self,
        package: impl Into<String>,
    ) -> Result<Dispatch, SyncError> {
        self.mutate(Mutation::RemoveConda {
            package: package.into(),
        })
        .await
    }

    pub fn conda_deps(&self) -> Option<Arc<CondaDependencies>> {
        self.inner.cache.conda().value
    }

    /// The cached conda manifest declares at least one dependency.
    pub fn has_conda_deps(&self) -> bool {
        self.inner.cache.conda().has_entries()
    }

    pub fn conda_state(&self) -> SliceState<CondaDependencies> {
        self.inner.cache.conda()
    }

    pub fn conda_pending(&self) -> bool {
        self.inner.cache.conda().pending()
    }

    pub fn conda_error(&self) -> Option<SyncError> {
        self.inner.cache.conda().error
    }

    pub fn conda_stream(&self) -> SliceStream<CondaDependencies> {
        SliceStream::new(self.inner.cache.subscribe_conda())
    }

    /// At least one operation is outstanding on some slice.
    pub fn is_pending(&self) -> bool {
        self.inner.cache.is_pending()
    }

    fn require_active(&self) -> Result<u64, SyncError> {
        match self.inner.active_epoch.load(Ordering::SeqCst) {
            0 => Err(SyncError::inactive()),
            epoch => Ok(epoch),
        }
    }
}

impl ControllerInner {
    /// Query the daemon and replace every slice with the result, provided
    /// the session that asked is still current and no broadcast for that
    /// slice arrived while the query was in flight.
    async fn fetch_snapshot(&self, epoch: u64, mode: FetchMode) -> Result<(), SyncError> {
        let request = Request::GetDeps;
        let command = request.name();
        let mode_name: &'static str = mode.into();

        let mark = self.cache.broadcast_mark();
        let outcome = match self.commands.call(request).await {
            Ok(reply) => reply.into_snapshot(command).map_err(SyncError::from),
            Err(e) => Err(SyncError::from(&e)),
        };

        match outcome {
            Ok(snapshot) => {
                if self.cache.apply_fetched(epoch, snapshot, mark) {
                    debug!(label = %self.config.label, epoch, mode = mode_name, "snapshot applied");
                } else {
                    debug!(
                        epoch,
                        mode = mode_name,
                        "snapshot not applied; session ended or a broadcast landed first"
                    );
                }
                Ok(())
            }
            Err(error) => {
                match mode {
                    FetchMode::Initial => {
                        debug!(epoch, error = %error, "initial snapshot fetch failed");
                    }
                    FetchMode::Resync => {
                        warn!(epoch, error = %error, "resync snapshot fetch failed");
                    }
                    FetchMode::Refresh => {
                        warn!(epoch, error = %error, "refresh failed");
                    }
                }
                Err(error)
            }
        }
    }

    fn apply_broadcast(&self, epoch: u64, broadcast: &DaemonBroadcast) {
        match broadcast {
            DaemonBroadcast::DepsChanged(snapshot) => {
                if self.cache.apply_broadcast(epoch, snapshot.clone()) {
                    debug!(label = %self.config.label, epoch, "applied deps_changed broadcast");
                }
            }
            DaemonBroadcast::Other => trace!("ignoring untracked broadcast"),
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.subscription.unsubscribe();
            session.cancel.cancel();
        }
    }
}

// ── Broadcast listener ───────────────────────────────────────────

/// Apply broadcasts for one session until it is cancelled.
///
/// Holds only a weak reference so a forgotten controller can still be
/// dropped.
async fn listen(
    inner: Weak<ControllerInner>,
    epoch: u64,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            notification = subscription.recv() => notification,
        };
        let Some(notification) = notification else {
            debug!(epoch, "broadcast subscription closed");
            break;
        };
        let Some(controller) = inner.upgrade() else {
            break;
        };

        match notification {
            Notification::Broadcast(broadcast) => controller.apply_broadcast(epoch, &broadcast),
            Notification::Resync(reason) => {
                if !controller.config.resync_on_notice {
                    trace!(?reason, "ignoring resync notice");
                    continue;
                }
                debug!(?reason, epoch, "resyncing after possibly missed broadcasts");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = controller.fetch_snapshot(epoch, FetchMode::Resync) => {}
                }
            }
        }
    }

    subscription.unsubscribe();
    trace!(epoch, "broadcast listener exiting");
}
