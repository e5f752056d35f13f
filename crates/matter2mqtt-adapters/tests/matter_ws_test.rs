//! Matter WebSocket adapter tests against a mock Matter server
//!
//! The mock accepts WebSocket connections on a local port, greets each with a
//! server info frame and answers `start_listening` and `device_command`
//! requests. An event frame is sent before every snapshot response to check
//! that unrelated frames are skipped.

#![cfg(feature = "websocket")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use matter2mqtt_adapters::{MatterWsCommandChannel, MatterWsSource};
use matter2mqtt_core::{
    CommandChannel, CommandChannelManager, CommandError, EndpointKey, MatterSettings, OnOffAction,
    SnapshotSource, SourceError,
};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    /// Close the first connection right after the greeting.
    DropFirst,
    /// Answer device commands with an error code.
    RejectCommands,
}

struct MockMatterServer {
    url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl MockMatterServer {
    async fn start(nodes: Value, mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let requests = requests.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let drop_now = mode == Mode::DropFirst && index == 0;
                    tokio::spawn(serve(stream, nodes.clone(), mode, drop_now, requests.clone()));
                }
            })
        };

        Self {
            url,
            requests,
            connections,
            task,
        }
    }

    fn settings(&self) -> MatterSettings {
        MatterSettings::new(self.url.clone())
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockMatterServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    nodes: Value,
    mode: Mode,
    drop_now: bool,
    requests: Arc<Mutex<Vec<Value>>>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let hello = json!({"fabric_id": 1, "schema_version": 11, "sdk_version": "mock"});
    if ws.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }
    if drop_now {
        let _ = ws.close(None).await;
        return;
    }

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let request: Value = serde_json::from_str(&text).unwrap();
        requests.lock().push(request.clone());
        let id = request["message_id"].clone();

        let replies = match request["command"].as_str() {
            Some("start_listening") => vec![
                json!({"event": "node_updated", "data": {"node_id": 99}}),
                json!({"message_id": id, "result": nodes}),
            ],
            Some("device_command") if mode == Mode::RejectCommands => vec![json!({
                "message_id": id,
                "error_code": 5,
                "details": "Node 42 is not available"
            })],
            Some("device_command") => vec![json!({"message_id": id, "result": null})],
            _ => vec![json!({"message_id": id, "error_code": 1, "details": "unknown command"})],
        };
        for reply in replies {
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

fn sample_nodes() -> Value {
    json!([
        {"node_id": 42, "available": true, "attributes": {"3/6/0": true, "3/29/0": []}},
        {"node_id": 7, "available": false, "attributes": {"1/6/0": false}}
    ])
}

#[tokio::test]
async fn test_source_handshake_and_snapshot() {
    let server = MockMatterServer::start(sample_nodes(), Mode::Normal).await;
    let source = MatterWsSource::new(&server.settings());

    let hello = source.connect().await.unwrap();
    assert_eq!(hello.schema_version, Some(11));
    assert_eq!(hello.sdk_version.as_deref(), Some("mock"));

    let nodes = source.fetch_snapshot().await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_id, 42);
    assert_eq!(nodes[0].attributes["3/6/0"], json!(true));
    assert!(!nodes[1].available);

    let requests = server.requests();
    assert_eq!(requests[0]["command"], "start_listening");
    assert_eq!(requests[0]["args"], json!({}));
    assert!(requests[0]["message_id"].is_string());

    source.close().await.unwrap();
}

#[tokio::test]
async fn test_source_non_list_result_is_empty() {
    let server = MockMatterServer::start(json!({"unexpected": true}), Mode::Normal).await;
    let source = MatterWsSource::new(&server.settings());
    source.connect().await.unwrap();

    assert!(source.fetch_snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_source_reconnects_on_next_fetch() {
    let server = MockMatterServer::start(sample_nodes(), Mode::DropFirst).await;
    let source = MatterWsSource::new(&server.settings());
    source.connect().await.unwrap();

    let err = source.fetch_snapshot().await.unwrap_err();
    assert!(matches!(err, SourceError::ConnectionFailed(_)));

    let nodes = source.fetch_snapshot().await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_source_closed_is_shutdown_noise() {
    let server = MockMatterServer::start(sample_nodes(), Mode::Normal).await;
    let source = MatterWsSource::new(&server.settings());
    source.connect().await.unwrap();
    source.close().await.unwrap();

    let err = source.fetch_snapshot().await.unwrap_err();
    assert!(matches!(err, SourceError::Closed(_)));
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_source_connect_failure() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let source = MatterWsSource::new(&MatterSettings::new(format!("ws://127.0.0.1:{}/ws", port)));

    let err = source.connect().await.unwrap_err();
    assert!(matches!(err, SourceError::ConnectionFailed(_)));
}

#[tokio::test]
async fn test_device_command_frame() {
    let server = MockMatterServer::start(sample_nodes(), Mode::Normal).await;
    let channel = MatterWsCommandChannel::new(&server.settings());
    channel.connect().await.unwrap();

    channel
        .send_command(EndpointKey::new(42, 3), OnOffAction::Off)
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["command"], "device_command");
    assert_eq!(
        requests[0]["args"],
        json!({
            "node_id": 42,
            "endpoint_id": 3,
            "cluster_id": 6,
            "command_name": "Off",
            "payload": {}
        })
    );
}

#[tokio::test]
async fn test_device_command_rejected() {
    let server = MockMatterServer::start(sample_nodes(), Mode::RejectCommands).await;
    let channel = MatterWsCommandChannel::new(&server.settings());
    channel.connect().await.unwrap();

    let err = channel
        .send_command(EndpointKey::new(42, 3), OnOffAction::On)
        .await
        .unwrap_err();

    match err {
        CommandError::Rejected(reason) => assert!(reason.contains("not available")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_manager_recovers_dropped_command_connection() {
    let server = MockMatterServer::start(sample_nodes(), Mode::DropFirst).await;
    let manager = CommandChannelManager::new(Arc::new(MatterWsCommandChannel::new(&server.settings())));
    manager.connect().await.unwrap();

    manager
        .send_on_off(EndpointKey::new(42, 3), OnOffAction::Toggle, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(manager.reconnect_count(), 1);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(server.requests().len(), 1);
}
