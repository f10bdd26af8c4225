//! Integration tests for the bakery chat server
//!
//! These tests spin up a real server and talk raw JSON frames to it to verify
//! the handshake, role checks, and snapshot pushes.

use std::sync::Arc;
use std::time::Duration;

use bakery_chat::LiveStore;
use bakery_chat_server::{ServerState, DEFAULT_WELCOME};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const OPERATOR_TOKEN: &str = "s3cret";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a test server on a random available port
async fn start_test_server(welcome: bool) -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(ServerState::new(
        Arc::new(LiveStore::in_memory()),
        Some(OPERATOR_TOKEN.to_string()),
        welcome.then(|| DEFAULT_WELCOME.to_string()),
    ));

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();
            let state = state.clone();
            tokio::spawn(async move {
                bakery_chat_server::handle_connection(ws_stream, state).await;
            });
        }
    });

    (port, handle)
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame as JSON
async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Stream closed")
            .expect("Read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Connect and send the `connect` frame; returns the socket and the auth response
async fn connect(port: u16, connect_frame: Value) -> (Ws, Value) {
    let url = format!("ws://127.0.0.1:{}", port);
    let (mut ws, _) = connect_async(&url).await.expect("Failed to connect");
    send(&mut ws, connect_frame).await;
    let response = recv(&mut ws).await;
    assert_eq!(response["type"], "auth_response");
    (ws, response)
}

async fn connect_customer(port: u16) -> Ws {
    let (ws, response) = connect(port, json!({"type": "connect", "role": "customer"})).await;
    assert_eq!(response["success"], true);
    ws
}

async fn connect_operator(port: u16) -> Ws {
    let (ws, response) = connect(
        port,
        json!({"type": "connect", "role": "operator", "token": OPERATOR_TOKEN}),
    )
    .await;
    assert_eq!(response["success"], true);
    ws
}

#[tokio::test]
async fn test_customer_connects_without_token() {
    let (port, server_handle) = start_test_server(false).await;
    let _customer = connect_customer(port).await;
    server_handle.abort();
}

#[tokio::test]
async fn test_operator_with_wrong_token_is_refused() {
    let (port, server_handle) = start_test_server(false).await;

    let (mut ws, response) = connect(
        port,
        json!({"type": "connect", "role": "operator", "token": "guess"}),
    )
    .await;
    assert_eq!(response["success"], false);

    // Server closes after a failed handshake
    let next = timeout(Duration::from_secs(5), ws.next()).await.expect("Timeout");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

    server_handle.abort();
}

#[tokio::test]
async fn test_operator_without_token_is_refused() {
    let (port, server_handle) = start_test_server(false).await;
    let (_ws, response) = connect(port, json!({"type": "connect", "role": "operator"})).await;
    assert_eq!(response["success"], false);
    server_handle.abort();
}

#[tokio::test]
async fn test_customer_message_reaches_operator_feed() {
    let (port, server_handle) = start_test_server(false).await;
    let mut operator = connect_operator(port).await;
    let mut customer = connect_customer(port).await;

    send(&mut operator, json!({"type": "subscribe", "subscription_id": 1})).await;
    let initial = recv(&mut operator).await;
    assert_eq!(initial["type"], "snapshot");
    assert_eq!(initial["messages"].as_array().unwrap().len(), 0);

    send(
        &mut customer,
        json!({
            "type": "append",
            "request_id": 1,
            "draft": {"session_id": "abc", "message": "Hi", "is_customer_authored": true}
        }),
    )
    .await;
    let appended = recv(&mut customer).await;
    assert_eq!(appended["type"], "appended");
    assert_eq!(appended["request_id"], 1);
    assert_eq!(appended["message"]["message"], "Hi");
    assert_eq!(appended["message"]["read_by_operator"], false);

    let pushed = recv(&mut operator).await;
    assert_eq!(pushed["type"], "snapshot");
    assert_eq!(pushed["subscription_id"], 1);
    assert_eq!(pushed["messages"][0]["id"], appended["message"]["id"]);

    server_handle.abort();
}

#[tokio::test]
async fn test_mark_read_and_delete_session() {
    let (port, server_handle) = start_test_server(false).await;
    let mut operator = connect_operator(port).await;
    let mut customer = connect_customer(port).await;

    send(
        &mut customer,
        json!({
            "type": "append",
            "request_id": 1,
            "draft": {"session_id": "abc", "message": "Is the rye in?", "is_customer_authored": true}
        }),
    )
    .await;
    let appended = recv(&mut customer).await;
    let id = appended["message"]["id"].clone();

    send(&mut operator, json!({"type": "mark_read", "request_id": 2, "message_id": id})).await;
    let done = recv(&mut operator).await;
    assert_eq!(done["type"], "done");
    assert_eq!(done["request_id"], 2);

    send(
        &mut operator,
        json!({"type": "mark_read", "request_id": 3, "message_id": "missing"}),
    )
    .await;
    let missing = recv(&mut operator).await;
    assert_eq!(missing["type"], "failure");
    assert_eq!(missing["kind"], "not_found");

    send(
        &mut operator,
        json!({"type": "delete_session", "request_id": 4, "session_id": "abc"}),
    )
    .await;
    let cleared = recv(&mut operator).await;
    assert_eq!(cleared["type"], "done");
    assert_eq!(cleared["count"], 1);

    server_handle.abort();
}

#[tokio::test]
async fn test_customer_forbidden_operations() {
    let (port, server_handle) = start_test_server(false).await;
    let mut customer = connect_customer(port).await;

    send(&mut customer, json!({"type": "subscribe", "subscription_id": 5})).await;
    let global = recv(&mut customer).await;
    assert_eq!(global["type"], "failure");
    assert_eq!(global["request_id"], 5);
    assert_eq!(global["kind"], "forbidden");

    send(
        &mut customer,
        json!({"type": "delete_session", "request_id": 6, "session_id": "abc"}),
    )
    .await;
    let delete = recv(&mut customer).await;
    assert_eq!(delete["kind"], "forbidden");

    server_handle.abort();
}

#[tokio::test]
async fn test_first_customer_subscribe_is_welcomed_once() {
    let (port, server_handle) = start_test_server(true).await;
    let mut customer = connect_customer(port).await;

    send(
        &mut customer,
        json!({"type": "subscribe", "subscription_id": 1, "session_id": "abc"}),
    )
    .await;
    let first = recv(&mut customer).await;
    let messages = first["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message"], DEFAULT_WELCOME);
    assert_eq!(messages[0]["is_customer_authored"], false);

    send(&mut customer, json!({"type": "unsubscribe", "subscription_id": 1})).await;
    send(
        &mut customer,
        json!({"type": "subscribe", "subscription_id": 2, "session_id": "abc"}),
    )
    .await;
    let second = recv(&mut customer).await;
    assert_eq!(second["subscription_id"], 2);
    assert_eq!(second["messages"].as_array().unwrap().len(), 1);

    server_handle.abort();
}
