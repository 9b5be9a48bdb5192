//! Transport layer: raw JSON-RPC channels to backends.
//!
//! One [`Transport`] value per live connection, tagged by kind. Every variant
//! offers the same operations (`request`, `notify`, `disconnect`), so the
//! session layer never needs to know which wire it is talking over.

pub mod http;
pub mod pending;
pub mod sse;
pub mod stdio;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::config::{BackendConfig, TransportKind};
use crate::errors::GatewayError;
use crate::protocol::{error_codes, JsonRpcResponse};

pub use self::http::HttpTransport;
pub use self::sse::SseTransport;
pub use self::stdio::StdioTransport;
pub use self::websocket::WebSocketTransport;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// An established channel to one backend.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    WebSocket(WebSocketTransport),
    Sse(SseTransport),
}

impl Transport {
    /// Establish the channel described by `config`.
    ///
    /// Missing transport-specific fields fail with `ConfigError` before any
    /// process is spawned or socket opened.
    pub async fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        tracing::debug!(server = %config.name, transport = %config.transport, "opening transport");

        let transport = match config.transport {
            TransportKind::Stdio => Transport::Stdio(StdioTransport::connect(config).await?),
            TransportKind::Http => Transport::Http(HttpTransport::connect(config)?),
            TransportKind::Websocket => {
                Transport::WebSocket(WebSocketTransport::connect(config).await?)
            }
            TransportKind::Sse => Transport::Sse(SseTransport::connect(config).await?),
        };
        Ok(transport)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Http(_) => TransportKind::Http,
            Transport::WebSocket(_) => TransportKind::Websocket,
            Transport::Sse(_) => TransportKind::Sse,
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        match self {
            Transport::Stdio(t) => t.request(method, params).await,
            Transport::Http(t) => t.request(method, params).await,
            Transport::WebSocket(t) => t.request(method, params).await,
            Transport::Sse(t) => t.request(method, params).await,
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
            Transport::WebSocket(t) => t.notify(method, params).await,
            Transport::Sse(t) => t.notify(method, params).await,
        }
    }

    /// Release the channel. Safe to call more than once.
    pub async fn disconnect(&self) {
        match self {
            Transport::Stdio(t) => t.disconnect().await,
            Transport::Http(t) => t.disconnect().await,
            Transport::WebSocket(t) => t.disconnect().await,
            Transport::Sse(t) => t.disconnect().await,
        }
    }

    /// Recent diagnostic output from the backend, if the transport captures
    /// any (subprocess stderr).
    pub fn diagnostics(&self) -> String {
        match self {
            Transport::Stdio(t) => t.stderr_tail(),
            _ => String::new(),
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to
/// `UpstreamError`.
pub fn extract_result(server: &str, response: JsonRpcResponse) -> Result<Value, GatewayError> {
    if let Some(err) = response.error {
        return Err(GatewayError::UpstreamError {
            name: server.to_string(),
            code: Some(err.code),
            message: err.message,
        });
    }

    response.result.ok_or_else(|| GatewayError::UpstreamError {
        name: server.to_string(),
        code: Some(error_codes::INTERNAL_ERROR),
        message: "response missing both result and error".into(),
    })
}

/// Serialize a message as one newline-terminated line.
pub(crate) fn encode_line<T: serde::Serialize>(
    server: &str,
    message: &T,
) -> Result<String, GatewayError> {
    let mut json = serde_json::to_string(message).map_err(|e| {
        GatewayError::connection(server, format!("failed to serialize message: {e}"))
    })?;
    json.push('\n');
    Ok(json)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
