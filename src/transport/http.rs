//! Streamable HTTP transport.
//!
//! Every request is one POST. The server answers either with a plain JSON
//! body or with an event stream whose events carry the response (possibly
//! preceded by server notifications). The `mcp-session-id` header assigned
//! on the first reply is echoed on every later request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::next_request_id;
use super::sse::SseDecoder;
use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::protocol::{
    classify_incoming, Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION,
};

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Streamable HTTP backend connection.
pub struct HttpTransport {
    server_name: String,
    url: String,
    client: Client,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Build the HTTP client. No request is sent until the handshake.
    pub fn connect(config: &BackendConfig) -> Result<Self, GatewayError> {
        let name = config.name.as_str();
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| GatewayError::config(format!("backend '{name}': url is required")))?;
        reqwest::Url::parse(url)
            .map_err(|e| GatewayError::config(format!("backend '{name}': invalid url '{url}': {e}")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| GatewayError::connection(name, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            server_name: name.to_string(),
            url: url.to_string(),
            client,
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn post(&self) -> Result<RequestBuilder, GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::connection(&self.server_name, "transport is closed"));
        }
        let mut req = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_BOTH)
            .header("mcp-protocol-version", PROTOCOL_VERSION);
        if let Some(sid) = self.session_id() {
            req = req.header(SESSION_HEADER, sid);
        }
        Ok(req)
    }

    fn remember_session(&self, response: &Response) {
        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(sid.to_string());
        }
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let response = self
            .post()?
            .json(&req)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.remember_session(&response);

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Err(GatewayError::connection(
                &self.server_name,
                "server returned 202 Accepted for a request (no response)",
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::connection(
                &self.server_name,
                format!("HTTP {status}: {body}"),
            ));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            self.read_streamed_response(id, response).await
        } else {
            response.json::<JsonRpcResponse>().await.map_err(|e| {
                GatewayError::connection(&self.server_name, format!("invalid JSON-RPC response: {e}"))
            })
        }
    }

    /// Read events until the response for `id` arrives.
    async fn read_streamed_response(
        &self,
        id: u64,
        response: Response,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();

        loop {
            let (events, done) = match bytes.next().await {
                Some(Ok(chunk)) => (decoder.push(&chunk), false),
                Some(Err(e)) => {
                    return Err(GatewayError::connection(
                        &self.server_name,
                        format!("stream read error: {e}"),
                    ))
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for event in events {
                match classify_incoming(&event.data) {
                    Some(Incoming::Response(resp)) if resp.id == Some(id) => return Ok(resp),
                    Some(Incoming::Response(resp)) => {
                        tracing::debug!(server = %self.server_name, id = ?resp.id, "ignoring unrelated response");
                    }
                    Some(Incoming::Request { method, .. }) | Some(Incoming::Notification { method }) => {
                        tracing::debug!(server = %self.server_name, method = %method, "server message on response stream");
                    }
                    None => {}
                }
            }

            if done {
                return Err(GatewayError::connection(
                    &self.server_name,
                    "event stream ended without a response",
                ));
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), GatewayError> {
        let notification = JsonRpcNotification::new(method, params);
        let response = self
            .post()?
            .json(&notification)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.remember_session(&response);

        if !response.status().is_success() {
            return Err(GatewayError::connection(
                &self.server_name,
                format!("notification rejected: HTTP {}", response.status()),
            ));
        }
        Ok(())
    }

    /// Terminate the server-side session (best-effort) and refuse further
    /// requests.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(sid) = self.session_id() else {
            return;
        };
        match self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, sid)
            .send()
            .await
        {
            Ok(resp) => {
                tracing::debug!(server = %self.server_name, status = %resp.status(), "terminated HTTP session");
            }
            Err(e) => {
                tracing::debug!(server = %self.server_name, error = %e, "failed to terminate HTTP session");
            }
        }
    }

    fn send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::connection(&self.server_name, format!("request timed out: {e}"))
        } else {
            GatewayError::connection(&self.server_name, format!("request failed: {e}"))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
