//! In-process daemon.
//!
//! [`LoopbackDaemon`] owns a [`DepsSnapshot`] and applies commands to it
//! the way the real daemon does: every mutation is acknowledged with
//! [`Reply::Done`] and then broadcast as a full [`DaemonBroadcast::DepsChanged`]
//! snapshot to every subscriber. The controls (`set_online`, `fail_next`,
//! `pause_calls`, `hold_broadcasts`) let callers reproduce the timing and
//! failure situations a networked daemon produces.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::channel::{
    BroadcastChannel, BroadcastHub, CallFuture, CommandChannel, ResyncReason, Subscription,
};
use crate::error::Error;
use crate::protocol::{
    CondaDependencies, DaemonBroadcast, DepsSnapshot, Reply, Request, UvDependencies,
};

#[derive(Default)]
struct Controls {
    failures: VecDeque<String>,
    held: Option<Vec<DaemonBroadcast>>,
    calls: Vec<Request>,
}

/// A daemon living in the same process as its clients.
pub struct LoopbackDaemon {
    state: Mutex<DepsSnapshot>,
    controls: Mutex<Controls>,
    hub: BroadcastHub,
    online: AtomicBool,
    paused: watch::Sender<bool>,
}

impl Default for LoopbackDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDaemon {
    /// A daemon whose notebook has no manifests.
    pub fn new() -> Self {
        Self::with_snapshot(DepsSnapshot::default())
    }

    pub fn with_snapshot(snapshot: DepsSnapshot) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(snapshot),
            controls: Mutex::new(Controls::default()),
            hub: BroadcastHub::new(),
            online: AtomicBool::new(true),
            paused,
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn snapshot(&self) -> DepsSnapshot {
        self.state().clone()
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<Request> {
        self.controls().calls.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    // ── Controls ─────────────────────────────────────────────────────

    /// Overwrite the document without broadcasting, as if the change
    /// happened while subscribers were not listening.
    pub fn replace_snapshot(&self, snapshot: DepsSnapshot) {
        *self.state() = snapshot;
    }

    /// While offline every call fails with [`Error::NotConnected`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make the next call fail with [`Error::Remote`] carrying `message`.
    /// Queued failures are consumed in order.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.controls().failures.push_back(message.into());
    }

    /// Hold every call at the door until [`resume_calls`](Self::resume_calls).
    pub fn pause_calls(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_calls(&self) {
        self.paused.send_replace(false);
    }

    /// Queue broadcasts instead of delivering them.
    pub fn hold_broadcasts(&self) {
        let mut controls = self.controls();
        if controls.held.is_none() {
            controls.held = Some(Vec::new());
        }
    }

    /// Deliver every held broadcast in order and stop holding. Returns how
    /// many were released.
    pub fn release_broadcasts(&self) -> usize {
        let held = self.controls().held.take().unwrap_or_default();
        let released = held.len();
        for broadcast in held {
            self.hub.publish(broadcast);
        }
        released
    }

    /// Push an arbitrary broadcast, subject to [`hold_broadcasts`](Self::hold_broadcasts).
    pub fn publish(&self, broadcast: DaemonBroadcast) {
        let mut controls = self.controls();
        if let Some(held) = controls.held.as_mut() {
            held.push(broadcast);
            return;
        }
        drop(controls);
        self.hub.publish(broadcast);
    }

    /// Tell subscribers they may have missed broadcasts.
    pub fn request_resync(&self) -> usize {
        self.hub.request_resync(ResyncReason::Reconnected)
    }

    // ── Command handling ─────────────────────────────────────────────

    /// Process one command.
    pub async fn handle(&self, request: Request) -> Result<Reply, Error> {
        let command = request.name();
        self.controls().calls.push(request.clone());

        let mut gate = self.paused.subscribe();
        // The sender lives in `self`, so this never observes a closed channel.
        let _ = gate.wait_for(|paused| !*paused).await;

        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if let Some(message) = self.controls().failures.pop_front() {
            return Err(Error::Remote {
                command: command.into(),
                message,
            });
        }

        if let Request::GetDeps = request {
            return Ok(Reply::Deps(self.snapshot()));
        }

        let snapshot = {
            let mut state = self.state();
            apply(&mut state, request);
            state.clone()
        };
        debug!(command, "loopback daemon applied mutation");
        self.publish(DaemonBroadcast::DepsChanged(snapshot));
        Ok(Reply::Done)
    }

    fn state(&self) -> MutexGuard<'_, DepsSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn controls(&self) -> MutexGuard<'_, Controls> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply(state: &mut DepsSnapshot, request: Request) {
    match request {
        Request::GetDeps => {}
        Request::SetUvDeps {
            dependencies,
            requires_python,
        } => {
            state.uv = Some(UvDependencies {
                dependencies,
                requires_python,
            });
        }
        Request::AddUvDep { package } => {
            let uv = state.uv.get_or_insert_with(UvDependencies::default);
            add_unique(&mut uv.dependencies, package);
        }
        Request::RemoveUvDep { package } => {
            if let Some(uv) = state.uv.as_mut() {
                uv.dependencies.retain(|d| *d != package);
            }
        }
        Request::SetCondaDeps {
            dependencies,
            channels,
            python,
        } => {
            state.conda = Some(CondaDependencies {
                dependencies,
                channels,
                python,
            });
        }
        Request::AddCondaDep { package } => {
            let conda = state.conda.get_or_insert_with(CondaDependencies::default);
            add_unique(&mut conda.dependencies, package);
        }
        Request::RemoveCondaDep { package } => {
            if let Some(conda) = state.conda.as_mut() {
                conda.dependencies.retain(|d| *d != package);
            }
        }
    }
}

fn add_unique(list: &mut Vec<String>, package: String) {
    if !list.contains(&package) {
        list.push(package);
    }
}

impl CommandChannel for LoopbackDaemon {
    fn call(&self, request: Request) -> CallFuture<'_> {
        Box::pin(self.handle(request))
    }
}

impl BroadcastChannel for LoopbackDaemon {
    fn subscribe(&self) -> Result<Subscription, Error> {
        Ok(self.hub.subscribe())
    }
}
