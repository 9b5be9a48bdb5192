//! Server-sent events: an incremental decoder and the legacy HTTP+SSE
//! transport.
//!
//! The legacy transport opens a long-lived GET stream. The server first sends
//! an `endpoint` event naming where to POST messages; every response then
//! comes back as a `message` event on the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::next_request_id;
use super::pending::PendingRequests;
use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE decoder fed with arbitrary chunk boundaries.
///
/// Bytes are buffered until a blank line completes an event, so a multi-byte
/// character split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // CRLF line endings collapse to LF; a bare `\r` never appears inside
        // JSON-RPC payloads.
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_event(&String::from_utf8_lossy(&block[..end])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_event(&String::from_utf8_lossy(&rest))
    }
}

/// Parse one blank-line-delimited block. Comment-only and data-less blocks
/// (keep-alives) yield `None`.
fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
    })
}

// ─── Legacy Transport ────────────────────────────────────────────────────────

/// Legacy HTTP+SSE backend connection.
pub struct SseTransport {
    server_name: String,
    client: Client,
    endpoint: Url,
    pending: Arc<PendingRequests>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        let name = config.name.as_str();
        let raw_url = config
            .url
            .as_deref()
            .ok_or_else(|| GatewayError::config(format!("backend '{name}': url is required")))?;
        let stream_url = Url::parse(raw_url)
            .map_err(|e| GatewayError::config(format!("backend '{name}': invalid url '{raw_url}': {e}")))?;
        let connect_timeout = Duration::from_secs(config.timeout);

        // No overall timeout: the stream stays open for the session's lifetime.
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::connection(name, format!("failed to build HTTP client: {e}")))?;

        let response = client
            .get(stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| GatewayError::connection(name, format!("failed to open event stream: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::connection(
                name,
                format!("event stream returned HTTP {}", response.status()),
            ));
        }

        let pending = PendingRequests::new(name);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();

        let reader = {
            let pending = Arc::clone(&pending);
            let client = client.clone();
            let server = name.to_string();
            let base_url = stream_url.clone();
            tokio::spawn(async move {
                let mut endpoint_tx = Some(endpoint_tx);
                let mut endpoint: Option<Url> = None;
                let mut decoder = SseDecoder::new();
                let mut bytes = response.bytes_stream();

                let reason = loop {
                    let chunk = match bytes.next().await {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => break format!("event stream read error: {e}"),
                        None => break "event stream closed".to_string(),
                    };
                    for event in decoder.push(&chunk) {
                        match event.event.as_str() {
                            "endpoint" => match base_url.join(event.data.trim()) {
                                Ok(url) => {
                                    tracing::debug!(server = %server, endpoint = %url, "received message endpoint");
                                    endpoint = Some(url.clone());
                                    if let Some(tx) = endpoint_tx.take() {
                                        let _ = tx.send(url);
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(server = %server, data = %event.data, error = %e, "invalid endpoint event");
                                }
                            },
                            "message" => {
                                let Some(reply) = pending.handle_frame(&event.data) else {
                                    continue;
                                };
                                if let Some(url) = &endpoint {
                                    if let Err(e) = client.post(url.clone()).json(&reply).send().await {
                                        tracing::warn!(server = %server, error = %e, "failed to answer server request");
                                    }
                                }
                            }
                            other => {
                                tracing::debug!(server = %server, event = other, "ignoring event");
                            }
                        }
                    }
                };
                pending.fail_all(&reason);
            })
        };

        let endpoint = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                reader.abort();
                return Err(GatewayError::connection(
                    name,
                    "event stream closed before the endpoint event",
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(GatewayError::Timeout {
                    operation: format!("waiting for endpoint event from '{name}'"),
                    timeout_ms: connect_timeout.as_millis() as u64,
                });
            }
        };

        tracing::info!(server = name, url = %stream_url, "connected event stream");
        Ok(Self {
            server_name: name.to_string(),
            client,
            endpoint,
            pending,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    /// Where messages are POSTed.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let id = next_request_id();
        let slot = self.pending.register(id)?;
        self.post(&JsonRpcRequest::new(id, method, params)).await?;
        slot.wait().await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn post<T: serde::Serialize>(&self, message: &T) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::connection(&self.server_name, "transport is closed"));
        }
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| GatewayError::connection(&self.server_name, format!("failed to post message: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::connection(
                &self.server_name,
                format!("message endpoint returned HTTP {}", response.status()),
            ));
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            reader.abort();
        }
        self.pending.fail_all("transport disconnected");
        tracing::debug!(server = %self.server_name, "closed event stream");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
