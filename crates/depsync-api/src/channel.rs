//! Transport seams and the broadcast fan-out shared by every transport.
//!
//! A [`Subscription`] is an explicit receive queue owned by one consumer
//! task. Unsubscribing is idempotent and also happens on drop, so a
//! consumer that goes away can never keep receiving notifications.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::Error;
use crate::protocol::{DaemonBroadcast, Reply, Request};

const HUB_CAPACITY: usize = 256;

/// Future returned by [`CommandChannel::call`].
pub type CallFuture<'a> = BoxFuture<'a, Result<Reply, Error>>;

/// Request/response path to the daemon.
///
/// One call yields exactly one reply or failure. A failure means the
/// effect is unknown: the daemon may or may not have applied the command.
/// No ordering is promised between concurrent calls.
pub trait CommandChannel: Send + Sync {
    fn call(&self, request: Request) -> CallFuture<'_>;
}

/// Push path from the daemon to every connected client.
pub trait BroadcastChannel: Send + Sync {
    fn subscribe(&self) -> Result<Subscription, Error>;
}

// ── Notifications ────────────────────────────────────────────────────

/// Why a subscriber may have missed broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// The subscriber fell behind and `n` notifications were dropped.
    Lagged(u64),
    /// The transport re-established its connection to the daemon.
    Reconnected,
}

/// An item delivered to a [`Subscription`].
#[derive(Debug, Clone)]
pub enum Notification {
    Broadcast(Arc<DaemonBroadcast>),
    /// Broadcasts may have been missed; consumers should re-read state.
    Resync(ResyncReason),
}

// ── BroadcastHub ─────────────────────────────────────────────────────

/// Fan-out of daemon notifications to all local subscribers.
///
/// Cheaply cloneable; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Notification>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(HUB_CAPACITY)
    }

    /// Create a hub whose per-subscriber queue holds `capacity` items
    /// before the oldest are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver a broadcast to every current subscriber. Returns how many
    /// subscribers it reached.
    pub fn publish(&self, broadcast: DaemonBroadcast) -> usize {
        // Send errors just mean nobody is listening right now.
        self.tx
            .send(Notification::Broadcast(Arc::new(broadcast)))
            .unwrap_or(0)
    }

    /// Tell every subscriber that broadcasts may have been missed.
    pub fn request_resync(&self, reason: ResyncReason) -> usize {
        self.tx.send(Notification::Resync(reason)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            cancel: CancellationToken::new(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// A live registration on a [`BroadcastHub`].
///
/// Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wait for the next notification.
    ///
    /// Returns `None` once unsubscribed or when the hub is gone. A lagging
    /// receiver yields [`ResyncReason::Lagged`] instead of an error.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.rx.recv() => match result {
                Ok(notification) => Some(notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "broadcast subscriber lagged");
                    Some(Notification::Resync(ResyncReason::Lagged(skipped)))
                }
                Err(RecvError::Closed) => None,
            },
        }
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            trace!("unsubscribing from daemon broadcasts");
        }
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// A detached handle that can unsubscribe this subscription from
    /// another task.
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            cancel: self.cancel.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Remote control for a [`Subscription`] owned by another task.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    /// Stop delivery. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
