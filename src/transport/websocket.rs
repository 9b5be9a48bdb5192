//! JSON-RPC over a WebSocket: one message per text frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::next_request_id;
use super::pending::PendingRequests;
use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Duplex-socket backend connection.
pub struct WebSocketTransport {
    server_name: String,
    sink: WsSink,
    pending: Arc<PendingRequests>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    pub async fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        let name = config.name.as_str();
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| GatewayError::config(format!("backend '{name}': url is required")))?;

        let timeout = Duration::from_secs(config.timeout);
        let (stream, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: format!("websocket connect to '{name}'"),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| GatewayError::connection(name, format!("websocket handshake failed: {e}")))?;

        let (sink, mut source) = stream.split();
        let sink: WsSink = Arc::new(tokio::sync::Mutex::new(sink));
        let pending = PendingRequests::new(name);

        let reader = {
            let pending = Arc::clone(&pending);
            let sink = Arc::clone(&sink);
            let server = name.to_string();
            tokio::spawn(async move {
                let reason = loop {
                    match source.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = pending.handle_frame(&text) {
                                let frame = Message::Text(reply.to_string());
                                if let Err(e) = sink.lock().await.send(frame).await {
                                    tracing::warn!(server = %server, error = %e, "failed to answer server request");
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break format!("server closed the socket: {frame:?}");
                        }
                        // Ping/pong are handled by tungstenite; binary frames are not JSON-RPC.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("websocket read error: {e}"),
                        None => break "websocket closed".to_string(),
                    }
                };
                pending.fail_all(&reason);
            })
        };

        tracing::info!(server = name, url, "connected websocket");
        Ok(Self {
            server_name: name.to_string(),
            sink,
            pending,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let id = next_request_id();
        let slot = self.pending.register(id)?;
        self.send(&JsonRpcRequest::new(id, method, params)).await?;
        slot.wait().await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        self.send(&JsonRpcNotification::new(method, params)).await
    }

    async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::connection(&self.server_name, "transport is closed"));
        }
        let text = serde_json::to_string(message).map_err(|e| {
            GatewayError::connection(&self.server_name, format!("failed to serialize message: {e}"))
        })?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::connection(&self.server_name, format!("failed to send frame: {e}")))
    }

    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(server = %self.server_name, error = %e, "error closing websocket");
        }
        if let Some(reader) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            reader.abort();
        }
        self.pending.fail_all("transport disconnected");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
