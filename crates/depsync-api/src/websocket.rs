//! WebSocket daemon client with auto-reconnect.
//!
//! Holds one connection to the daemon and multiplexes every command call
//! over it, correlating replies by call id. Broadcast frames are fanned out
//! through a [`BroadcastHub`]. Reconnection uses exponential backoff with
//! jitter; each successful connection emits a
//! [`ResyncReason::Reconnected`] notice so subscribers can re-read state
//! they may have missed while disconnected.
//!
//! # Example
//!
//! ```rust,ignore
//! use depsync_api::{ClientConfig, DaemonClient, Request};
//!
//! let client = DaemonClient::connect(ClientConfig::new("ws://127.0.0.1:47110".parse()?));
//! client.wait_connected(std::time::Duration::from_secs(5)).await?;
//!
//! let snapshot = client.request(Request::GetDeps).await?.into_snapshot("get_deps")?;
//! println!("{snapshot:?}");
//!
//! client.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::channel::{
    BroadcastChannel, BroadcastHub, CallFuture, CommandChannel, ResyncReason, Subscription,
};
use crate::error::Error;
use crate::protocol::{CallFrame, Reply, Request, ServerFrame};

const OUTBOUND_CHANNEL_SIZE: usize = 64;
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 500ms.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Connection settings for a [`DaemonClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Daemon WebSocket endpoint, e.g. `ws://127.0.0.1:47110`.
    pub url: Url,
    /// Upper bound on a single command call.
    pub call_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── DaemonClient ─────────────────────────────────────────────────────

/// Outcome handed from the reader to a waiting caller.
enum CallOutcome {
    Reply(Reply),
    Failed(String),
}

type PendingCalls = Arc<DashMap<Uuid, oneshot::Sender<CallOutcome>>>;

struct Outbound {
    id: Uuid,
    text: String,
}

/// Handle to a running daemon connection.
///
/// Implements both [`CommandChannel`] and [`BroadcastChannel`]. Dropping
/// the client or calling [`shutdown`](Self::shutdown) stops the background
/// connection task.
pub struct DaemonClient {
    config: ClientConfig,
    hub: BroadcastHub,
    outbound_tx: mpsc::Sender<Outbound>,
    pending: PendingCalls,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl DaemonClient {
    /// Spawn the connection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously. Must be called
    /// from within a Tokio runtime.
    pub fn connect(config: ClientConfig) -> Self {
        let hub = BroadcastHub::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_SIZE);
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let pending: PendingCalls = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        let conn = Connection {
            url: config.url.clone(),
            hub: hub.clone(),
            pending: Arc::clone(&pending),
            state_tx,
            outbound_rx,
            cancel: cancel.clone(),
            reached_connected: false,
        };
        let reconnect = config.reconnect.clone();
        tokio::spawn(async move {
            ws_loop(conn, reconnect).await;
        });

        Self {
            config,
            hub,
            outbound_tx,
            pending,
            state,
            cancel,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Wait until the connection is established, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), Error> {
        let mut state = self.state.clone();
        let wait = state.wait_for(|s| {
            matches!(s, ConnectionState::Connected | ConnectionState::Failed)
        });

        let connected = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(s)) => *s == ConnectionState::Connected,
            Ok(Err(_)) => return Err(Error::Shutdown),
            Err(_) => {
                return Err(Error::Timeout {
                    command: "connect".into(),
                    timeout_ms: millis(timeout),
                });
            }
        };

        if connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send a command and wait for its reply.
    pub async fn request(&self, request: Request) -> Result<Reply, Error> {
        let command = request.name();
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let id = Uuid::new_v4();
        let text = serde_json::to_string(&CallFrame { id, call: request })?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _registration = PendingRegistration {
            pending: &self.pending,
            id,
        };

        trace!(%id, command, "sending daemon call");
        self.outbound_tx
            .send(Outbound { id, text })
            .await
            .map_err(|_| Error::Shutdown)?;

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(CallOutcome::Reply(reply))) => Ok(reply),
            Ok(Ok(CallOutcome::Failed(message))) => Err(Error::Remote {
                command: command.into(),
                message,
            }),
            // Sender dropped: the connection went away mid-call.
            Ok(Err(_)) => Err(Error::Disconnected {
                command: command.into(),
            }),
            Err(_) => Err(Error::Timeout {
                command: command.into(),
                timeout_ms: millis(self.config.call_timeout),
            }),
        }
    }

    /// Signal the background task to shut down. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CommandChannel for DaemonClient {
    fn call(&self, request: Request) -> CallFuture<'_> {
        Box::pin(self.request(request))
    }
}

impl BroadcastChannel for DaemonClient {
    fn subscribe(&self) -> Result<Subscription, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }
        Ok(self.hub.subscribe())
    }
}

/// Removes a call's reply slot when the caller stops waiting, whether it
/// got a reply, timed out, or was cancelled.
struct PendingRegistration<'a> {
    pending: &'a PendingCalls,
    id: Uuid,
}

impl Drop for PendingRegistration<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct Connection {
    url: Url,
    hub: BroadcastHub,
    pending: PendingCalls,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    /// The current attempt got as far as `Connected`.
    reached_connected: bool,
}

impl Connection {
    /// Fail every call that was waiting on the connection that just ended.
    fn fail_in_flight(&mut self) {
        let dropped = self.pending.len();
        // Dropping the senders wakes each caller with `Disconnected`.
        self.pending.clear();
        while self.outbound_rx.try_recv().is_ok() {}
        if dropped > 0 {
            warn!(dropped, "daemon connection lost with calls in flight");
        }
    }
}

/// Main loop: connect → serve → on error, backoff → reconnect.
async fn ws_loop(mut conn: Connection, reconnect: ReconnectConfig) {
    let mut attempt: u32 = 0;

    loop {
        if conn.cancel.is_cancelled() {
            break;
        }

        let _ = conn.state_tx.send(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        });

        let cancel = conn.cancel.clone();
        conn.reached_connected = false;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_serve(&mut conn) => result,
        };

        conn.fail_in_flight();
        // The retry budget covers consecutive failures only.
        if conn.reached_connected {
            attempt = 0;
        }

        let delay = match result {
            // Clean disconnect (close frame or stream ended).
            Ok(()) => {
                info!("daemon connection closed, reconnecting");
                attempt = 0;
                reconnect.initial_delay
            }
            Err(e) => {
                warn!(error = %e, attempt, "daemon connection error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "daemon reconnection limit reached, giving up"
                        );
                        let _ = conn.state_tx.send(ConnectionState::Failed);
                        return;
                    }
                }

                attempt = attempt.saturating_add(1);
                calculate_backoff(attempt - 1, &reconnect)
            }
        };

        let _ = conn
            .state_tx
            .send(ConnectionState::Reconnecting { attempt: attempt.max(1) });
        debug!(delay_ms = millis(delay), attempt, "waiting before reconnect");

        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    conn.fail_in_flight();
    let _ = conn.state_tx.send(ConnectionState::Disconnected);
    debug!("daemon connection loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a single connection and serve it until it drops.
async fn connect_and_serve(conn: &mut Connection) -> Result<(), Error> {
    info!(url = %conn.url, "connecting to daemon");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(conn.url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let _ = conn.state_tx.send(ConnectionState::Connected);
    conn.reached_connected = true;
    info!("daemon connected");
    // Anything broadcast while we were away is lost; tell subscribers.
    conn.hub.request_resync(ResyncReason::Reconnected);

    loop {
        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            outbound = conn.outbound_rx.recv() => {
                let Some(Outbound { id, text }) = outbound else {
                    return Ok(());
                };
                if let Err(e) = write.send(Message::text(text)).await {
                    conn.pending.remove(&id);
                    return Err(Error::WebSocketConnect(e.to_string()));
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_str(), &conn.pending, &conn.hub);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong automatically
                        trace!("daemon ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "daemon closed connection");
                        } else {
                            info!("daemon closed connection (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        info!("daemon stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame dispatch ───────────────────────────────────────────────────

/// Route one daemon frame to the waiting caller or the broadcast hub.
fn dispatch_frame(text: &str, pending: &PendingCalls, hub: &BroadcastHub) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "skipping malformed daemon frame");
            return;
        }
    };

    match frame {
        ServerFrame::Response { id, reply, error } => {
            let Some((_, tx)) = pending.remove(&id) else {
                debug!(%id, "reply for unknown or expired call");
                return;
            };
            let outcome = match (reply, error) {
                (_, Some(message)) => CallOutcome::Failed(message),
                (Some(reply), None) => CallOutcome::Reply(reply),
                (None, None) => CallOutcome::Failed("daemon sent an empty response".into()),
            };
            // Caller may have given up already
            let _ = tx.send(outcome);
        }
        ServerFrame::Broadcast { payload } => {
            let delivered = hub.publish(payload);
            trace!(delivered, "daemon broadcast");
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(32)).unwrap_or(32);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::Notification;
    use crate::protocol::{DaemonBroadcast, DepsSnapshot};

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(d10 <= Duration::from_secs(13), "delay {d10:?} not capped");
    }

    #[test]
    fn dispatch_routes_reply_to_waiting_call() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let hub = BroadcastHub::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(id, tx);

        let frame = ServerFrame::reply(id, Reply::Done);
        dispatch_frame(&serde_json::to_string(&frame).unwrap(), &pending, &hub);

        assert!(matches!(rx.try_recv(), Ok(CallOutcome::Reply(Reply::Done))));
        assert!(pending.is_empty());
    }

    #[test]
    fn dispatch_routes_failure_to_waiting_call() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let hub = BroadcastHub::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(id, tx);

        let frame = ServerFrame::failure(id, "unknown package");
        dispatch_frame(&serde_json::to_string(&frame).unwrap(), &pending, &hub);

        let Ok(CallOutcome::Failed(message)) = rx.try_recv() else {
            panic!("expected a failure outcome");
        };
        assert_eq!(message, "unknown package");
    }

    #[tokio::test]
    async fn dispatch_publishes_broadcasts() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();

        let frame = ServerFrame::broadcast(DaemonBroadcast::DepsChanged(DepsSnapshot::default()));
        dispatch_frame(&serde_json::to_string(&frame).unwrap(), &pending, &hub);

        assert!(matches!(sub.recv().await, Some(Notification::Broadcast(_))));
    }

    #[test]
    fn dispatch_skips_malformed_frames() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let hub = BroadcastHub::new();
        dispatch_frame("not json at all", &pending, &hub);
        dispatch_frame(r#"{"type":"response","id":"00000000-0000-0000-0000-000000000000"}"#, &pending, &hub);
        assert!(pending.is_empty());
    }
}
