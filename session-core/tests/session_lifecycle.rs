//! Integration tests against an in-process fake exchange.
//!
//! The fake exchange speaks just enough JSON-RPC to drive the auth ->
//! subscribe -> ready handshake so the rest of the engine can be exercised
//! end to end, the way `oprf-service`'s test suite spins up a real
//! `TestServer` rather than mocking at the type level.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use session_core::{
    Adapter, ClassifiedIncoming, Credentials, Error, Frame, HeartbeatConfig, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RateLimitConfig, RequestOutcome, SessionConfigBuilder,
    Supervisor,
};

struct FakeExchangeBehavior {
    /// When set, the handler silently swallows this method instead of
    /// replying, to exercise request timeouts.
    swallow_method: Option<&'static str>,
}

async fn spawn_fake_exchange(behavior: FakeExchangeBehavior) -> SocketAddr {
    let behavior = Arc::new(behavior);
    let app = Router::new().route(
        "/ws",
        get(move |upgrade: WebSocketUpgrade| {
            let behavior = behavior.clone();
            async move { upgrade.on_upgrade(move |socket| handle_socket(socket, behavior)) }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn handle_socket(mut socket: WebSocket, behavior: Arc<FakeExchangeBehavior>) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            WsMessage::Text(text) => {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                let method = value.get("method").and_then(|m| m.as_str()).unwrap_or("");
                let id = value.get("id").and_then(|v| v.as_i64());

                if behavior.swallow_method == Some(method) {
                    continue;
                }

                let Some(id) = id else { continue };
                let result = match method {
                    "public/auth" => json!({"access_token": "fake-token"}),
                    "private/subscribe" => json!(["book.BTC-PERPETUAL"]),
                    "private/unsubscribe" => json!([]),
                    _ => json!({"echoed": method}),
                };
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                if socket
                    .send(WsMessage::Text(reply.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WsMessage::Ping(payload) => {
                let _ = socket.send(WsMessage::Pong(payload)).await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

struct TestAdapter {
    auth_should_fail: AtomicBool,
}

impl TestAdapter {
    fn new() -> Self {
        Self {
            auth_should_fail: AtomicBool::new(false),
        }
    }
}

impl Adapter for TestAdapter {
    fn build_auth_request(&self, id: i64, credentials: &Credentials) -> JsonRpcRequest {
        JsonRpcRequest::new(
            id,
            "public/auth",
            Some(json!({"client_id": credentials.client_id})),
        )
    }

    fn on_auth_response(&self, outcome: &RequestOutcome) -> Result<(), String> {
        if self.auth_should_fail.load(Ordering::SeqCst) {
            return Err("forced auth failure".to_string());
        }
        match outcome {
            RequestOutcome::Success(_) => Ok(()),
            RequestOutcome::Error { message, .. } => Err(message.clone()),
        }
    }

    fn build_subscribe(&self, id: i64, channels: &[String]) -> JsonRpcRequest {
        JsonRpcRequest::new(id, "private/subscribe", Some(json!({"channels": channels})))
    }

    fn build_unsubscribe(&self, id: i64, channels: &[String]) -> JsonRpcRequest {
        JsonRpcRequest::new(
            id,
            "private/unsubscribe",
            Some(json!({"channels": channels})),
        )
    }

    fn classify_incoming(&self, frame: &Frame) -> ClassifiedIncoming {
        let Frame::Text(text) = frame else {
            return ClassifiedIncoming::Unrecognized;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return ClassifiedIncoming::Unrecognized;
        };
        if value.get("id").is_some() {
            if let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(value) {
                return ClassifiedIncoming::Response(resp);
            }
        }
        if value.get("method").and_then(|m| m.as_str()) == Some("heartbeat") {
            return ClassifiedIncoming::Heartbeat(JsonRpcRequest::new(
                0,
                "public/test",
                None,
            ));
        }
        if let Ok(note) = serde_json::from_value::<JsonRpcNotification>(value) {
            return ClassifiedIncoming::Notification(note);
        }
        ClassifiedIncoming::Unrecognized
    }
}

async fn wait_until_ready(handle: &session_core::SessionHandle, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if matches!(handle.state(), Ok(session_core::ConnectionState::Ready)) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "session never became ready");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_auth_subscribe_and_call() {
    let addr = spawn_fake_exchange(FakeExchangeBehavior {
        swallow_method: None,
    })
    .await;

    let config = SessionConfigBuilder::new()
        .url(format!("ws://{addr}/ws"))
        .credentials(Credentials::new("id", "secret"))
        .channel("book.BTC-PERPETUAL")
        .build()
        .unwrap();

    let supervisor = Supervisor::new();
    let session = supervisor.open(config, Arc::new(TestAdapter::new()));

    wait_until_ready(&session, Duration::from_secs(2)).await;

    let outcome = session.call("public/ping", None).await.unwrap();
    match outcome {
        RequestOutcome::Success(value) => assert_eq!(value["echoed"], "public/ping"),
        RequestOutcome::Error { message, .. } => panic!("unexpected rpc error: {message}"),
    }

    session.close();
}

#[tokio::test]
async fn request_times_out_when_server_ignores_method() {
    let addr = spawn_fake_exchange(FakeExchangeBehavior {
        swallow_method: Some("private/slow"),
    })
    .await;

    let config = SessionConfigBuilder::new()
        .url(format!("ws://{addr}/ws"))
        .credentials(Credentials::new("id", "secret"))
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let supervisor = Supervisor::new();
    let session = supervisor.open(config, Arc::new(TestAdapter::new()));
    wait_until_ready(&session, Duration::from_secs(2)).await;

    let result = session.call("private/slow", None).await;
    assert!(matches!(result, Err(Error::Timeout)));

    session.close();
}

#[tokio::test]
async fn call_before_ready_is_rejected() {
    let addr = spawn_fake_exchange(FakeExchangeBehavior {
        swallow_method: None,
    })
    .await;

    let config = SessionConfigBuilder::new()
        .url(format!("ws://{addr}/ws"))
        .credentials(Credentials::new("id", "secret"))
        .build()
        .unwrap();

    let supervisor = Supervisor::new();
    let session = supervisor.open(config, Arc::new(TestAdapter::new()));

    // The handshake hasn't had a chance to complete yet.
    let result = session.call("public/ping", None).await;
    assert!(matches!(result, Err(Error::NotConnected)));

    session.close();
}

#[tokio::test]
async fn rate_limiter_queues_then_admits_bursts() {
    let addr = spawn_fake_exchange(FakeExchangeBehavior {
        swallow_method: None,
    })
    .await;

    let config = SessionConfigBuilder::new()
        .url(format!("ws://{addr}/ws"))
        .credentials(Credentials::new("id", "secret"))
        .rate_limit(RateLimitConfig {
            capacity: 1,
            refill_rate: 1,
            refill_interval: Duration::from_millis(50),
            queue_max: 5,
        })
        .heartbeat(HeartbeatConfig::None)
        .build()
        .unwrap();

    let supervisor = Supervisor::new();
    let session = supervisor.open(config, Arc::new(TestAdapter::new()));
    wait_until_ready(&session, Duration::from_secs(2)).await;

    let mut handles = Vec::new();
    for i in 0..3 {
        let session = &session;
        handles.push(async move { session.call(format!("public/ping{i}"), None).await });
    }
    let results = futures::future::join_all(handles).await;
    for result in results {
        assert!(result.is_ok(), "queued request should eventually be admitted");
    }

    session.close();
}
