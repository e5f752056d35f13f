//! Request/response framing over the Matter server WebSocket.
//!
//! Requests are `{"message_id", "command", "args"}` frames. The server sends
//! its info frame first after connecting, answers each request with a frame
//! carrying the same `message_id`, and may interleave event frames, which are
//! skipped. Requests on one connection are serialized.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use matter2mqtt_core::{CommandError, MatterSettings, SourceError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Matter WebSocket failures.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No connection, or the server dropped it.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// `close` was called.
    #[error("Connection closed")]
    Closed,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Invalid message: {0}")]
    Protocol(String),

    /// The server answered with an error code.
    #[error("Server error {code}: {details}")]
    Server { code: i64, details: String },
}

impl From<RpcError> for SourceError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::NotConnected(reason) | RpcError::Connect(reason) => {
                SourceError::ConnectionFailed(reason)
            }
            RpcError::Closed => SourceError::Closed("closing transport".to_string()),
            RpcError::Timeout(d) => SourceError::Timeout(d),
            e @ (RpcError::Protocol(_) | RpcError::Server { .. }) => {
                SourceError::Protocol(e.to_string())
            }
        }
    }
}

impl From<RpcError> for CommandError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::NotConnected(reason) => CommandError::NotConnected(reason),
            RpcError::Closed => CommandError::NotConnected("connection closed".to_string()),
            RpcError::Connect(reason) => CommandError::ConnectionFailed(reason),
            RpcError::Timeout(d) => CommandError::Timeout(d),
            e @ (RpcError::Protocol(_) | RpcError::Server { .. }) => {
                CommandError::Rejected(e.to_string())
            }
        }
    }
}

/// Match a frame against a pending request.
///
/// Returns `None` for frames that belong to something else.
pub(crate) fn match_response(frame: &Value, message_id: &str) -> Option<Result<Value, RpcError>> {
    if frame.get("message_id").and_then(Value::as_str) != Some(message_id) {
        return None;
    }
    if let Some(code) = frame.get("error_code") {
        let details = frame
            .get("details")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Some(Err(RpcError::Server {
            code: code.as_i64().unwrap_or(-1),
            details,
        }));
    }
    Some(Ok(frame.get("result").cloned().unwrap_or(Value::Null)))
}

/// One WebSocket connection to the Matter server.
pub struct MatterRpc {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    conn: Mutex<Option<WsStream>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MatterRpc {
    pub fn new(settings: &MatterSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout(),
            request_timeout: settings.request_timeout(),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether `close` was called since the last successful `open`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Open a new connection, replacing any existing one, and return the
    /// server info frame.
    pub async fn open(&self) -> Result<Value, RpcError> {
        let mut conn = self.conn.lock().await;
        if let Some(mut old) = conn.take() {
            if let Err(e) = old.close(None).await {
                trace!("Error closing previous Matter connection: {}", e);
            }
        }

        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| RpcError::Timeout(self.connect_timeout))?
            .map_err(|e| RpcError::Connect(e.to_string()))?;

        let hello = tokio::time::timeout(self.connect_timeout, next_json(&mut ws))
            .await
            .map_err(|_| RpcError::Timeout(self.connect_timeout))??;

        self.closed.store(false, Ordering::SeqCst);
        *conn = Some(ws);
        Ok(hello)
    }

    /// Send one command and wait for its response.
    pub async fn request(&self, command: &str, args: Value) -> Result<Value, RpcError> {
        let mut conn = self.conn.lock().await;
        let Some(ws) = conn.as_mut() else {
            return Err(if self.is_closed() {
                RpcError::Closed
            } else {
                RpcError::NotConnected("no connection to the Matter server".to_string())
            });
        };

        let message_id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let frame = json!({
            "message_id": message_id,
            "command": command,
            "args": args,
        });
        debug!("Sending Matter command: {}", command);

        match tokio::time::timeout(self.request_timeout, exchange(ws, &message_id, frame.to_string()))
            .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                if matches!(e, RpcError::NotConnected(_)) {
                    *conn = None;
                }
                Err(e)
            }
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
        }
    }

    /// Close the connection. Later requests fail with [`RpcError::Closed`].
    pub async fn close(&self) -> Result<(), RpcError> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(mut ws) = self.conn.lock().await.take() else {
            return Ok(());
        };
        match ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(RpcError::Protocol(format!("close failed: {}", e))),
        }
    }
}

async fn exchange(ws: &mut WsStream, message_id: &str, frame: String) -> Result<Value, RpcError> {
    ws.send(Message::Text(frame))
        .await
        .map_err(|e| RpcError::NotConnected(e.to_string()))?;

    loop {
        let frame = next_json(ws).await?;
        match match_response(&frame, message_id) {
            Some(result) => return result,
            None => trace!("Skipping unrelated Matter frame"),
        }
    }
}

/// Read the next text frame as JSON, skipping control and binary frames.
async fn next_json(ws: &mut WsStream) -> Result<Value, RpcError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| RpcError::Protocol(format!("invalid JSON frame: {}", e)));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(RpcError::NotConnected("connection closed by server".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(RpcError::NotConnected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_response() {
        let frame = json!({"message_id": "7", "result": [1, 2]});
        assert!(match_response(&frame, "6").is_none());
        assert_eq!(match_response(&frame, "7").unwrap().unwrap(), json!([1, 2]));

        let event = json!({"event": "attribute_updated", "data": [1, "1/6/0", true]});
        assert!(match_response(&event, "7").is_none());

        let no_result = json!({"message_id": "8"});
        assert_eq!(match_response(&no_result, "8").unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn test_match_error_response() {
        let frame = json!({"message_id": "3", "error_code": 5, "details": "Node 42 is not available"});

        match match_response(&frame, "3") {
            Some(Err(RpcError::Server { code, details })) => {
                assert_eq!(code, 5);
                assert_eq!(details, "Node 42 is not available");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping() {
        assert!(CommandError::from(RpcError::NotConnected("eof".into())).is_connection_loss());
        assert!(CommandError::from(RpcError::Closed).is_connection_loss());
        assert!(matches!(
            CommandError::from(RpcError::Server {
                code: 1,
                details: "unknown".into()
            }),
            CommandError::Rejected(_)
        ));

        assert!(matches!(SourceError::from(RpcError::Closed), SourceError::Closed(_)));
        assert!(matches!(
            SourceError::from(RpcError::NotConnected("eof".into())),
            SourceError::ConnectionFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_request_without_connection() {
        let rpc = MatterRpc::new(&MatterSettings::new("ws://127.0.0.1:5580/ws"));

        assert!(matches!(
            rpc.request("start_listening", json!({})).await,
            Err(RpcError::NotConnected(_))
        ));

        rpc.close().await.unwrap();
        assert!(matches!(
            rpc.request("start_listening", json!({})).await,
            Err(RpcError::Closed)
        ));
    }
}
