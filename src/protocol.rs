//! Wire types shared by transports, sessions and the router.
//!
//! JSON-RPC 2.0 framing plus the subset of MCP catalog structures the gateway
//! federates. Unknown fields on catalog entries are preserved in `extra` so
//! they pass through the gateway untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MCP protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is absent only for error responses to requests the peer could not
/// parse at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A frame received from a backend, classified by shape.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Backend-initiated request that expects an answer.
    Request { id: Value, method: String },
    /// Backend-initiated notification.
    Notification { method: String },
}

/// Classify one raw inbound frame.
///
/// Returns `None` for anything that is not a JSON-RPC message (e.g. log lines
/// a subprocess printed to stdout).
pub fn classify_incoming(raw: &str) -> Option<Incoming> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let obj = value.as_object()?;

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        return match obj.get("id") {
            Some(id) if !id.is_null() => Some(Incoming::Request {
                id: id.clone(),
                method,
            }),
            _ => Some(Incoming::Notification { method }),
        };
    }

    if obj.contains_key("result") || obj.contains_key("error") {
        return serde_json::from_value(value).ok().map(Incoming::Response);
    }

    None
}

/// Build the answer to a backend-initiated request.
///
/// The gateway acts as a plain client: it answers `ping` and declines
/// everything else (sampling, roots, elicitation) with `METHOD_NOT_FOUND`.
pub fn reply_to_server_request(id: &Value, method: &str) -> Value {
    if method == "ping" {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": error_codes::METHOD_NOT_FOUND,
                "message": format!("method '{method}' is not supported by this client"),
            },
        })
    }
}

// ─── MCP Handshake ───────────────────────────────────────────────────────────

/// MCP initialize response payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── MCP Catalog Types ───────────────────────────────────────────────────────

/// A callable unit with a declared input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema", rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A named template that expands to a message sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Addressable content exposed by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One item of tool output or prompt message content.
///
/// Only `text` is interpreted by the gateway; every other content kind
/// (image, audio, embedded resource, ...) is carried verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentItem {
    /// A plain text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// `tools/call` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// `prompts/get` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: ContentItem,
}

/// `resources/read` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContents {
    #[serde(default)]
    pub uri: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}

impl ReadResourceResult {
    /// Text of the first content entry; binary entries yield their base64
    /// payload. Empty when the backend returned nothing.
    pub fn into_text(self) -> String {
        self.contents
            .into_iter()
            .next()
            .and_then(|c| c.text.or(c.blob))
            .unwrap_or_default()
    }
}

/// One page of a `*/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage<T> {
    #[serde(
        alias = "tools",
        alias = "prompts",
        alias = "resources",
        default = "Vec::new"
    )]
    pub items: Vec<T>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
