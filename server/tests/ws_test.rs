//! Integration tests for the WebSocket gateway: envelope dispatch,
//! register/login, session tokens, routing and connection cleanup.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_server::auth::service::MIN_COST;
use courier_server::auth::AuthService;
use courier_server::db::SqliteCredentialStore;
use courier_server::state::{AppState, SessionSettings};
use courier_server::ws::ConnectionRegistry;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    connections: ConnectionRegistry,
    session_secret: Vec<u8>,
    _tmp_dir: tempfile::TempDir,
}

/// Helper: start the server on a random port.
async fn start_test_server() -> TestServer {
    start_test_server_with(SessionSettings::default()).await
}

async fn start_test_server_with(settings: SessionSettings) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let session_secret = courier_server::auth::jwt::load_or_generate_session_secret(&data_dir)
        .expect("Failed to generate session secret");
    let auth = AuthService::new(Arc::new(SqliteCredentialStore::new(db)), MIN_COST);
    let connections = ConnectionRegistry::new();

    let state = AppState {
        auth,
        connections: connections.clone(),
        session_secret: session_secret.clone(),
        settings,
    };

    let app = courier_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        connections,
        session_secret,
        _tmp_dir: tmp_dir,
    }
}

async fn connect(server: &TestServer) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Read the next text frame, skipping pings.
async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Expected a frame within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

async fn next_json(ws: &mut WsStream) -> Value {
    let text = next_text(ws).await;
    serde_json::from_str(&text).unwrap_or_else(|_| panic!("Expected JSON, got: {}", text))
}

/// Wait for the connection to be closed by the server.
async fn expect_closed(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Expected close within timeout");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(Message::Text(_))) | Some(Ok(Message::Ping(_))) => continue,
            None | Some(Err(_)) => return None,
            other => panic!("Expected close, got: {:?}", other),
        }
    }
}

fn action(action: &str, username: &str, password: &str) -> Value {
    json!({"type": "action", "action": action, "username": username, "password": password})
}

fn message(from: &str, to: &str, content: &str) -> Value {
    json!({"type": "message", "from": from, "to": to, "content_type": "text/plain", "content": content})
}

/// Register + login on `ws`, returning the session token.
async fn register_and_login(ws: &mut WsStream, username: &str, password: &str) -> String {
    send_json(ws, action("register", username, password)).await;
    assert_eq!(next_text(ws).await, "Ok");
    send_json(ws, action("login", username, password)).await;
    let reply = next_json(ws).await;
    assert_eq!(reply["type"], "session", "login failed: {}", reply);
    reply["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_login_scenario() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, action("register", "u1", "p1")).await;
    assert_eq!(next_text(&mut ws).await, "Ok");

    send_json(&mut ws, action("login", "u1", "wrong")).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "InvalidCredentials");
    assert!(!reply.to_string().contains("wrong"), "password echoed back");

    send_json(&mut ws, action("login", "u1", "p1")).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "session");
    assert_eq!(reply["username"], "u1");
    assert!(reply["token"].as_str().is_some_and(|t| !t.is_empty()));

    // The identity is now bound to a live connection
    assert!(server.connections.lookup("u1").is_ok());
}

#[tokio::test]
async fn test_duplicate_registration_and_unknown_user() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, action("register", "alice", "pw")).await;
    assert_eq!(next_text(&mut ws).await, "Ok");

    send_json(&mut ws, action("register", "alice", "other")).await;
    assert_eq!(next_json(&mut ws).await["kind"], "DuplicateUser");

    send_json(&mut ws, action("login", "nobody", "pw")).await;
    assert_eq!(next_json(&mut ws).await["kind"], "NotFound");

    // Errors do not close the connection
    send_json(&mut ws, action("login", "alice", "pw")).await;
    assert_eq!(next_json(&mut ws).await["type"], "session");
}

#[tokio::test]
async fn test_unknown_type_keeps_connection_open() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, json!({"type": "presence", "status": "away"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "UnknownType");

    send_json(&mut ws, action("register", "still-here", "pw")).await;
    assert_eq!(next_text(&mut ws).await, "Ok");
}

#[tokio::test]
async fn test_malformed_json_closes_only_that_connection() {
    let server = start_test_server().await;
    let mut bad = connect(&server).await;
    let mut good = connect(&server).await;

    bad.send(Message::Text("{this is not json".into())).await.unwrap();
    let reply = next_json(&mut bad).await;
    assert_eq!(reply["kind"], "MalformedJSON");
    let code = expect_closed(&mut bad).await;
    assert!(code.is_none() || code == Some(1007), "unexpected close code {:?}", code);

    send_json(&mut good, action("register", "survivor", "pw")).await;
    assert_eq!(next_text(&mut good).await, "Ok");
}

#[tokio::test]
async fn test_message_requires_login() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    send_json(&mut ws, message("alice", "bob", "hi")).await;
    assert_eq!(next_json(&mut ws).await["kind"], "Unauthenticated");

    register_and_login(&mut ws, "alice", "pw").await;

    send_json(&mut ws, message("mallory", "bob", "hi")).await;
    assert_eq!(next_json(&mut ws).await["kind"], "IdentityMismatch");

    // Offline recipient: still acknowledged
    send_json(&mut ws, message("alice", "bob", "hi")).await;
    assert_eq!(next_text(&mut ws).await, "Ok");
}

#[tokio::test]
async fn test_message_routed_to_recipient() {
    let server = start_test_server().await;
    let mut alice = connect(&server).await;
    let mut bob = connect(&server).await;

    register_and_login(&mut alice, "alice", "pa").await;
    register_and_login(&mut bob, "bob", "pb").await;

    send_json(&mut alice, message("alice", "bob", "hello bob")).await;
    assert_eq!(next_text(&mut alice).await, "Ok");

    let delivered = next_json(&mut bob).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["to"], "bob");
    assert_eq!(delivered["content_type"], "text/plain");
    assert_eq!(delivered["content"], "hello bob");
}

#[tokio::test]
async fn test_second_login_evicts_first_connection() {
    let server = start_test_server().await;
    let mut first = connect(&server).await;
    let mut second = connect(&server).await;

    register_and_login(&mut first, "alice", "pw").await;
    let first_id = server.connections.lookup("alice").unwrap().id();

    send_json(&mut second, action("login", "alice", "pw")).await;
    assert_eq!(next_json(&mut second).await["type"], "session");

    assert_eq!(expect_closed(&mut first).await, Some(4000));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(server.connections.lookup("alice").unwrap().id(), first_id);
}

#[tokio::test]
async fn test_disconnect_unbinds_identity() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;
    register_and_login(&mut ws, "leaver", "pw").await;
    assert!(server.connections.lookup("leaver").is_ok());

    ws.close(None).await.unwrap();
    drop(ws);

    let mut unbound = false;
    for _ in 0..50 {
        if server.connections.lookup("leaver").is_err() {
            unbound = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(unbound, "registry entry survived disconnect");
}

#[tokio::test]
async fn test_session_token_resumes_identity() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;
    let token = register_and_login(&mut ws, "alice", "pw").await;
    ws.close(None).await.unwrap();
    drop(ws);

    let url = format!("ws://{}/ws?token={}", server.addr, token);
    let (mut resumed, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    send_json(&mut resumed, message("alice", "bob", "back again")).await;
    assert_eq!(next_text(&mut resumed).await, "Ok");
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let server = start_test_server().await;
    let url = format!("ws://{}/ws?token=invalid_session_token", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let code = expect_closed(&mut ws).await;
    assert!(code.is_none() || code == Some(4002), "unexpected close code {:?}", code);
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    ws.send(Message::Ping(vec![42, 43, 44].into())).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => assert_eq!(data.as_ref(), &[42, 43, 44]),
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_binary_frames_are_decoded() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    let frame = action("register", "binary-user", "pw").to_string().into_bytes();
    ws.send(Message::Binary(frame.into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "Ok");
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("ok"));
}

#[tokio::test]
async fn test_idle_peer_is_closed_with_1001() {
    let server = start_test_server_with(SessionSettings {
        idle_timeout: Duration::from_secs(1),
        ..SessionSettings::default()
    })
    .await;
    let mut ws = connect(&server).await;

    let started = std::time::Instant::now();
    assert_eq!(expect_closed(&mut ws).await, Some(1001));
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let server = start_test_server().await;
    let now = chrono::Utc::now().timestamp();
    let claims = courier_server::auth::jwt::Claims {
        sub: "alice".into(),
        jti: "expired-session".into(),
        iat: now - 120,
        exp: now - 60,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&server.session_secret),
    )
    .unwrap();

    let url = format!("ws://{}/ws?token={}", server.addr, token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket should upgrade even with expired token");

    let code = expect_closed(&mut ws).await;
    assert!(code.is_none() || code == Some(4001), "unexpected close code {:?}", code);
    assert!(server.connections.lookup("alice").is_err());
}

#[tokio::test]
async fn test_invalid_utf8_binary_frame_is_malformed() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    ws.send(Message::Binary(b"{\"type\":\"\xff\"}".to_vec().into()))
        .await
        .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "MalformedJSON");
    assert_eq!(expect_closed(&mut ws).await, Some(1007));
}

#[tokio::test]
async fn test_overlong_password_gets_error_frame() {
    let server = start_test_server().await;
    let mut ws = connect(&server).await;

    let password = format!("{}SECRET-TAIL", "a".repeat(72));
    send_json(&mut ws, action("register", "u1", &password)).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["kind"], "PasswordTooLong");
    assert!(!reply.to_string().contains("SECRET-TAIL"));

    // Connection stays usable
    send_json(&mut ws, action("register", "u1", "short")).await;
    assert_eq!(next_text(&mut ws).await, "Ok");
}
