// Integration tests for `DaemonClient` against a scripted WebSocket daemon.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use depsync_api::{
    BroadcastChannel, CallFrame, ClientConfig, CommandChannel, ConnectionState, DaemonBroadcast,
    DaemonClient, DepsSnapshot, Error, Notification, ReconnectConfig, Reply, Request, ServerFrame,
    UvDependencies,
};

// ── Helpers ─────────────────────────────────────────────────────────

enum Action {
    Respond(ServerFrame),
    Hangup,
    Ignore,
}

struct FakeDaemon {
    url: Url,
    push: mpsc::UnboundedSender<ServerFrame>,
}

/// Accept a single connection and answer each call with `handler`.
async fn spawn_daemon(handler: fn(&CallFrame) -> Action) -> FakeDaemon {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (push, mut push_rx) = mpsc::unbounded_channel::<ServerFrame>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                Some(frame) = push_rx.recv() => {
                    let text = serde_json::to_string(&frame).unwrap();
                    if write.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let call: CallFrame = serde_json::from_str(text.as_str()).unwrap();
                        match handler(&call) {
                            Action::Respond(frame) => {
                                let text = serde_json::to_string(&frame).unwrap();
                                if write.send(Message::text(text)).await.is_err() {
                                    return;
                                }
                            }
                            Action::Hangup => return,
                            Action::Ignore => {}
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => return,
                },
            }
        }
    });

    FakeDaemon {
        url: Url::parse(&format!("ws://{addr}")).unwrap(),
        push,
    }
}

/// Accept connections until the test ends: abort the first handshake, drop
/// the second connection right after upgrading it, keep later ones open.
/// Sends the number of every upgraded connection.
async fn spawn_flaky_daemon() -> (Url, mpsc::UnboundedReceiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (upgraded, upgraded_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut open = Vec::new();
        for n in 1usize.. {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            if n == 1 {
                drop(stream);
                continue;
            }
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            let _ = upgraded.send(n);
            if n > 2 {
                open.push(ws);
            }
        }
    });

    (Url::parse(&format!("ws://{addr}")).unwrap(), upgraded_rx)
}

fn sample_snapshot() -> DepsSnapshot {
    DepsSnapshot {
        uv: Some(UvDependencies {
            dependencies: vec!["numpy".into(), "pandas>=2".into()],
            requires_python: Some(">=3.10".into()),
        }),
        conda: None,
    }
}

async fn connected_client(url: Url, call_timeout: Duration) -> DaemonClient {
    let mut config = ClientConfig::new(url);
    config.call_timeout = call_timeout;
    let client = DaemonClient::connect(config);
    client.wait_connected(Duration::from_secs(5)).await.unwrap();
    client
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_deps_round_trip() {
    let daemon = spawn_daemon(|call| match call.call {
        Request::GetDeps => Action::Respond(ServerFrame::reply(
            call.id,
            Reply::Deps(sample_snapshot()),
        )),
        _ => Action::Respond(ServerFrame::reply(call.id, Reply::Done)),
    })
    .await;
    let client = connected_client(daemon.url.clone(), Duration::from_secs(5)).await;

    let snapshot = client
        .call(Request::GetDeps)
        .await
        .unwrap()
        .into_snapshot("get_deps")
        .unwrap();
    assert_eq!(snapshot, sample_snapshot());

    let reply = client
        .call(Request::AddUvDep {
            package: "scipy".into(),
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Done);

    client.shutdown();
}

#[tokio::test]
async fn test_broadcast_reaches_subscriber() {
    let daemon = spawn_daemon(|_| Action::Ignore).await;
    let client = connected_client(daemon.url.clone(), Duration::from_secs(5)).await;
    let mut sub = client.subscribe().unwrap();

    daemon
        .push
        .send(ServerFrame::broadcast(DaemonBroadcast::DepsChanged(
            sample_snapshot(),
        )))
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            // A reconnect notice may precede the broadcast.
            match sub.recv().await {
                Some(Notification::Broadcast(payload)) => return payload,
                Some(Notification::Resync(_)) => {}
                None => panic!("subscription closed"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        *payload,
        DaemonBroadcast::DepsChanged(sample_snapshot())
    );
}

// ── Failure paths ───────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_failure_is_reported() {
    let daemon =
        spawn_daemon(|call| Action::Respond(ServerFrame::failure(call.id, "invalid requirement")))
            .await;
    let client = connected_client(daemon.url.clone(), Duration::from_secs(5)).await;

    let err = client
        .call(Request::AddCondaDep {
            package: "???".into(),
        })
        .await
        .unwrap_err();

    match err {
        Error::Remote { command, message } => {
            assert_eq!(command, "add_conda_dep");
            assert_eq!(message, "invalid requirement");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn test_call_without_connection_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ClientConfig::new(Url::parse(&format!("ws://{addr}")).unwrap());
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_retries: Some(0),
    };
    let client = DaemonClient::connect(config);

    let err = client.call(Request::GetDeps).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));

    let err = client
        .wait_connected(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_retry_budget_resets_after_connecting() {
    let (url, mut upgraded) = spawn_flaky_daemon().await;
    let mut config = ClientConfig::new(url);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_retries: Some(1),
    };
    let client = DaemonClient::connect(config);

    // The failed handshake spends the only retry; the dropped connection
    // must still be retried.
    for expected in [2, 3] {
        let n = tokio::time::timeout(Duration::from_secs(5), upgraded.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, expected);
    }

    client.wait_connected(Duration::from_secs(5)).await.unwrap();
    assert_ne!(*client.connection_state().borrow(), ConnectionState::Failed);
    client.shutdown();
}

#[tokio::test]
async fn test_connection_drop_fails_in_flight_call() {
    let daemon = spawn_daemon(|_| Action::Hangup).await;
    let client = connected_client(daemon.url.clone(), Duration::from_secs(5)).await;

    let err = client.call(Request::GetDeps).await.unwrap_err();
    assert!(
        matches!(err, Error::Disconnected { ref command } if command == "get_deps"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let daemon = spawn_daemon(|_| Action::Ignore).await;
    let client = connected_client(daemon.url.clone(), Duration::from_millis(200)).await;

    let err = client.call(Request::GetDeps).await.unwrap_err();
    assert!(
        matches!(err, Error::Timeout { timeout_ms: 200, .. }),
        "unexpected error: {err:?}"
    );
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let daemon = spawn_daemon(|_| Action::Ignore).await;
    let client = connected_client(daemon.url.clone(), Duration::from_secs(5)).await;

    client.shutdown();

    assert!(matches!(
        client.call(Request::GetDeps).await.unwrap_err(),
        Error::Shutdown
    ));
    assert!(matches!(client.subscribe().unwrap_err(), Error::Shutdown));
}
