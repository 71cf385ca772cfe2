//! End-to-end channel tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use wok_core::Output;
use wok_runtime::{PlanDescriptor, SchedulerConfig, StaticNode};
use wok_server::{PathApplication, ServerConfig, WokServer};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn tree() -> StaticNode {
    StaticNode::new()
        .child(
            "hello",
            StaticNode::new().plan(PlanDescriptor::action(Output::Value(json!("hi")))),
        )
        .child(
            "wait",
            StaticNode::new().plan(PlanDescriptor::run(|ctx| async move {
                ctx.cancelled().await;
                Output::Nil
            })),
        )
        .child(
            "search",
            StaticNode::new().plan(
                PlanDescriptor::run(|ctx| async move {
                    Output::Value(json!({ "q": ctx.param("q").unwrap_or("") }))
                })
                .with_params(["q"]),
            ),
        )
}

/// Boot a test server and return the WS URL + server.
async fn boot_server() -> (String, Arc<WokServer>) {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let app = PathApplication::new(tree().into_root()).reload_on_events();
    let server = Arc::new(WokServer::new(
        config,
        SchedulerConfig::default(),
        Arc::new(app),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, frame: &str) {
    ws.send(Message::text(frame)).await.unwrap();
}

/// Next protocol frame as text, skipping control messages.
async fn recv(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .unwrap();
        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Binary(data) => return String::from_utf8(data.to_vec()).unwrap(),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            Message::Close(_) => panic!("channel closed"),
        }
    }
}

#[tokio::test]
async fn request_gets_response_then_done() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "REQUEST 1\r\nGET /hello HTTP/1.1\r\nHost: test\r\n\r\n").await;

    let response = recv(&mut ws).await;
    assert!(response.starts_with("RESPONSE 1\r\nHTTP/1.0 200 OK\r\n"));
    assert!(response.contains("Content-Type: application/json\r\n"));
    assert!(response.ends_with("\r\n\r\n[\"hi\"]"));
    assert_eq!(recv(&mut ws).await, "DONE 1\r\n");
}

#[tokio::test]
async fn close_cancels_invocation() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "REQUEST w\r\nGET /wait HTTP/1.1\r\n\r\n").await;
    send(&mut ws, "CLOSE w\r\n").await;
    assert_eq!(recv(&mut ws).await, "DONE w\r\n");
}

#[tokio::test]
async fn duplicate_id_retires_previous_invocation() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "REQUEST x\r\nGET /wait HTTP/1.1\r\n\r\n").await;
    send(&mut ws, "REQUEST x\r\nGET /hello HTTP/1.1\r\n\r\n").await;

    assert_eq!(recv(&mut ws).await, "DONE x\r\n");
    assert!(recv(&mut ws).await.starts_with("RESPONSE x\r\n"));
    assert_eq!(recv(&mut ws).await, "DONE x\r\n");
}

#[tokio::test]
async fn unknown_command_is_ignored() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "NOISE 1\r\n").await;
    send(&mut ws, "REQUEST 2\r\nGET /hello HTTP/1.1\r\n\r\n").await;
    assert!(recv(&mut ws).await.starts_with("RESPONSE 2\r\n"));
}

#[tokio::test]
async fn malformed_frame_closes_channel() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "no-separator").await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

#[tokio::test]
async fn events_push_apply_frames() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "REQUEST s\r\nGET /search?q=rust HTTP/1.1\r\n\r\n").await;
    let response = recv(&mut ws).await;
    assert!(response.ends_with(r#"[{"q":"rust"}]"#));

    send(&mut ws, "EVENT s\r\nq=tokio+axum").await;
    assert_eq!(recv(&mut ws).await, "APPLY s\r\n[{\"q\":\"tokio axum\"}]");

    send(&mut ws, "CLOSE s\r\n").await;
    assert_eq!(recv(&mut ws).await, "DONE s\r\n");
}

#[tokio::test]
async fn shutdown_retires_open_invocations() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, "REQUEST w\r\nGET /wait HTTP/1.1\r\n\r\n").await;
    // Let the invocation register before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.shutdown().shutdown();
    assert_eq!(recv(&mut ws).await, "DONE w\r\n");
}
