//! Wire protocol and transports for talking to the depsync daemon.
//!
//! The daemon owns the authoritative dependency manifests of a notebook.
//! Clients never edit that state directly: they send commands and learn
//! about the outcome through broadcasts that the daemon fans out to every
//! connected client.
//!
//! - **[`protocol`]**: Request, reply, and broadcast types plus the JSON
//!   frames exchanged over the wire.
//! - **[`CommandChannel`] / [`BroadcastChannel`]**: The two transport seams
//!   consumed by `depsync-core`: one request/response call per command, and
//!   a push stream of change notifications delivered through a
//!   [`Subscription`].
//! - **[`DaemonClient`]**: WebSocket implementation of both seams with
//!   auto-reconnect, request correlation, and per-call timeouts.
//! - **[`LoopbackDaemon`]**: In-process daemon implementing both seams,
//!   used for embedding and tests.

pub mod channel;
pub mod error;
pub mod loopback;
pub mod protocol;
pub mod websocket;

pub use channel::{
    BroadcastChannel, BroadcastHub, CallFuture, CommandChannel, Notification, ResyncReason,
    Subscription, SubscriptionHandle,
};
pub use error::Error;
pub use loopback::LoopbackDaemon;
pub use protocol::{
    CallFrame, CondaDependencies, DaemonBroadcast, DepsSnapshot, Reply, Request, ServerFrame,
    UvDependencies,
};
pub use websocket::{ClientConfig, ConnectionState, DaemonClient, ReconnectConfig};
