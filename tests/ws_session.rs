//! End-to-end WebSocket tests: a real server instance per test, driven
//! through tokio-tungstenite.

#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use relay_gateway::config::ServerConfig;
use relay_gateway::domain::SessionId;
use relay_gateway::server::RelayServer;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        rate_limit_enabled: false,
        // Keep probes out of the way: tests drive traffic themselves.
        heartbeat_interval: Duration::from_secs(1000),
        metrics_interval: Duration::from_secs(1000),
        shutdown_grace: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

async fn spawn_server(config: ServerConfig) -> (RelayServer, SocketAddr) {
    let server = RelayServer::new(config);
    let addr = server.start().await.ok().unwrap_or_else(|| {
        panic!("server start failed");
    });
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Ws {
    let url = format!("ws://{addr}/ws");
    let (ws, _response) = connect_async(&url).await.ok().unwrap_or_else(|| {
        panic!("websocket connect failed");
    });
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    let text = value.to_string();
    ws.send(Message::Text(text.into())).await.ok().unwrap_or_else(|| {
        panic!("send failed");
    });
}

/// Reads frames until a text frame arrives, then parses it as JSON.
async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| {
                panic!("expected a frame before timeout");
            });
        match frame {
            Ok(Message::Text(text)) => {
                return serde_json::from_str(text.as_str()).ok().unwrap_or_else(|| {
                    panic!("server sent non-JSON text frame");
                });
            }
            Ok(Message::Close(frame)) => {
                panic!("unexpected close frame: {frame:?}");
            }
            Ok(_) => {}
            Err(err) => panic!("websocket error: {err}"),
        }
    }
}

/// Reads frames until a close frame arrives, returning its code.
async fn recv_close_code(ws: &mut Ws) -> u16 {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next()).await;
        match frame {
            Ok(Some(Ok(Message::Close(Some(close))))) => return close.code.into(),
            Ok(Some(Ok(Message::Close(None)))) => panic!("close frame without code"),
            Ok(Some(Ok(_))) => {}
            // Connection dropped without a close frame.
            Ok(Some(Err(_)) | None) => panic!("connection dropped without close frame"),
            Err(_) => panic!("expected a close frame before timeout"),
        }
    }
}

#[tokio::test]
async fn authenticate_returns_auth_success() {
    let (_server, addr) = spawn_server(test_config()).await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({
            "type": "authenticate",
            "id": "req-1",
            "payload": { "token": "abc", "userId": "u1" }
        }),
    )
    .await;

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply.get("type"), Some(&json!("auth_success")));
    assert_eq!(reply.get("id"), Some(&json!("req-1")));
    assert_eq!(
        reply.pointer("/payload/userId"),
        Some(&json!("u1"))
    );
}

#[tokio::test]
async fn authenticate_without_token_fails_in_band() {
    let (_server, addr) = spawn_server(test_config()).await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({ "type": "authenticate", "payload": { "userId": "u1" } }),
    )
    .await;

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply.get("type"), Some(&json!("error")));
    // Envelope errors keep the connection open: a ping still works.
    send_json(&mut ws, json!({ "type": "ping" })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply.get("type"), Some(&json!("pong")));
}

#[tokio::test]
async fn ping_gets_pong() {
    let (_server, addr) = spawn_server(test_config()).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, json!({ "type": "ping", "id": "p1" })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply.get("type"), Some(&json!("pong")));
    assert_eq!(reply.get("id"), Some(&json!("p1")));
}

#[tokio::test]
async fn invalid_envelope_gets_structured_error() {
    let (_server, addr) = spawn_server(test_config()).await;
    let mut ws = connect(addr).await;

    // subscribe without a channel field fails validation.
    send_json(&mut ws, json!({ "type": "subscribe", "payload": {} })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply.get("type"), Some(&json!("error")));
    assert_eq!(reply.pointer("/payload/code"), Some(&json!(1001)));
}

#[tokio::test]
async fn reconnect_resumes_session_and_replays_queue() {
    let (server, addr) = spawn_server(test_config()).await;

    // First connection establishes a fresh session.
    let mut ws1 = connect(addr).await;
    send_json(&mut ws1, json!({ "type": "reconnect" })).await;
    let reply = recv_json(&mut ws1).await;
    assert_eq!(reply.get("type"), Some(&json!("reconnect_response")));
    assert_eq!(reply.pointer("/payload/isReconnection"), Some(&json!(false)));
    let Some(sid_str) = reply.pointer("/payload/sessionId").and_then(Value::as_str) else {
        panic!("sessionId missing from reconnect_response");
    };
    let Some(sid) = SessionId::parse(sid_str) else {
        panic!("sessionId not parseable");
    };
    let sid_json = json!(sid_str);

    ws1.close(None).await.ok();
    // Let the server process the disconnect.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Queue a message for the detached session.
    let queued = server
        .sessions()
        .enqueue_for_session(sid, json!({ "type": "note", "n": 1 }))
        .await;
    assert!(queued);

    // Second connection resumes with the same session id.
    let mut ws2 = connect(addr).await;
    send_json(
        &mut ws2,
        json!({ "type": "reconnect", "payload": { "sessionId": sid_json } }),
    )
    .await;
    let reply = recv_json(&mut ws2).await;
    assert_eq!(reply.pointer("/payload/isReconnection"), Some(&json!(true)));
    assert_eq!(reply.pointer("/payload/sessionId"), Some(&sid_json));
    assert_eq!(reply.pointer("/payload/reconnectCount"), Some(&json!(1)));
    assert_eq!(
        reply.pointer("/payload/queuedMessages"),
        Some(&json!([{ "type": "note", "n": 1 }]))
    );

    // Resuming again: the queue was drained by the first resume.
    send_json(
        &mut ws2,
        json!({ "type": "reconnect", "payload": { "sessionId": sid_json } }),
    )
    .await;
    let reply = recv_json(&mut ws2).await;
    assert_eq!(reply.pointer("/payload/queuedMessages"), Some(&json!([])));
}

#[tokio::test]
async fn connection_over_capacity_is_closed_with_overload_code() {
    let config = ServerConfig {
        max_connections: 1,
        ..test_config()
    };
    let (server, addr) = spawn_server(config).await;

    let mut ws1 = connect(addr).await;
    // Round-trip to make sure the first connection is registered.
    send_json(&mut ws1, json!({ "type": "ping" })).await;
    let _ = recv_json(&mut ws1).await;
    assert_eq!(server.registry().len().await, 1);

    let mut ws2 = connect(addr).await;
    let code = recv_close_code(&mut ws2).await;
    assert_eq!(code, 1013);
    assert_eq!(server.registry().len().await, 1);
}

#[tokio::test]
async fn rate_limit_violation_closes_and_bans_origin() {
    let config = ServerConfig {
        rate_limit_enabled: true,
        rate_limit_max_requests: 3,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_ban: Duration::from_millis(500),
        ..test_config()
    };
    let (_server, addr) = spawn_server(config).await;

    let mut ws = connect(addr).await;
    for _ in 0..4 {
        send_json(&mut ws, json!({ "type": "ping" })).await;
    }
    // Three pongs, then a forced close with the rate-limit code.
    let code = recv_close_code(&mut ws).await;
    assert_eq!(code, 4029);

    // While the ban is active, new connections from this origin are
    // rejected with the banned code.
    let mut ws2 = connect(addr).await;
    let code = recv_close_code(&mut ws2).await;
    assert_eq!(code, 4003);

    // After the ban elapses the origin is welcome again.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let mut ws3 = connect(addr).await;
    send_json(&mut ws3, json!({ "type": "ping" })).await;
    let reply = recv_json(&mut ws3).await;
    assert_eq!(reply.get("type"), Some(&json!("pong")));
}

#[tokio::test]
async fn oversized_spam_is_rate_limited() {
    let config = ServerConfig {
        max_message_bytes: 64,
        rate_limit_enabled: true,
        rate_limit_max_requests: 3,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_ban: Duration::from_secs(60),
        ..test_config()
    };
    let (_server, addr) = spawn_server(config).await;
    let mut ws = connect(addr).await;

    // Each oversized frame draws an in-band error but still counts
    // against the window, so the spam cannot continue indefinitely.
    let big = json!({ "type": "chat", "payload": { "body": "x".repeat(200) } });
    for _ in 0..4 {
        send_json(&mut ws, big.clone()).await;
    }

    let code = recv_close_code(&mut ws).await;
    assert_eq!(code, 4029);
}

#[tokio::test]
async fn shutdown_notifies_clients_then_closes() {
    let (server, addr) = spawn_server(test_config()).await;
    let mut ws = connect(addr).await;

    // Make sure registration completed before shutting down.
    send_json(&mut ws, json!({ "type": "ping" })).await;
    let _ = recv_json(&mut ws).await;

    let shutdown = tokio::spawn(async move {
        server.shutdown().await;
        server
    });

    let notice = recv_json(&mut ws).await;
    assert_eq!(notice.get("type"), Some(&json!("server_shutdown")));

    let code = recv_close_code(&mut ws).await;
    assert_eq!(code, 1001);

    let server = shutdown.await.ok().unwrap_or_else(|| {
        panic!("shutdown task failed");
    });
    assert_eq!(server.registry().len().await, 0);
}

#[tokio::test]
async fn application_messages_are_forwarded_on_the_bus() {
    let (server, addr) = spawn_server(test_config()).await;
    let mut events = server.event_bus().subscribe();
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        json!({ "type": "chat", "payload": { "body": "hello" } }),
    )
    .await;

    let forwarded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let Ok(event) = events.recv().await else {
                panic!("event bus closed");
            };
            if let relay_gateway::domain::ServerEvent::MessageReceived { envelope, .. } = event {
                return envelope;
            }
        }
    })
    .await
    .ok()
    .unwrap_or_else(|| {
        panic!("message_received event not observed");
    });

    assert_eq!(forwarded.kind, "chat");
    assert_eq!(
        forwarded.payload.and_then(|p| p.get("body").cloned()),
        Some(json!("hello"))
    );
}
