//! A minimal MCP backend served over HTTP by wiremock.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Serves fixed tools and resources. Every `initialize` opens a new session
/// id (`sess-1`, `sess-2`, ...).
pub struct McpBackend {
    tools: Vec<String>,
    resources: Vec<(String, String)>,
    sessions: AtomicUsize,
}

impl McpBackend {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            resources: Vec::new(),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn with_resource(mut self, uri: &str, text: &str) -> Self {
        self.resources.push((uri.to_string(), text.to_string()));
        self
    }

    /// Start a server answering POSTs with this backend.
    pub async fn serve(self) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(self)
            .mount(&server)
            .await;
        server
    }

    fn result(&self, method: &str, params: &Value) -> Value {
        match method {
            "initialize" => {
                let mut capabilities = json!({ "tools": {} });
                if !self.resources.is_empty() {
                    capabilities["resources"] = json!({});
                }
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "serverInfo": { "name": "test-backend", "version": "0.1.0" },
                })
            }
            "tools/list" => json!({
                "tools": self
                    .tools
                    .iter()
                    .map(|t| json!({ "name": t, "inputSchema": { "type": "object" } }))
                    .collect::<Vec<_>>(),
            }),
            "tools/call" => json!({
                "content": [{ "type": "text", "text": format!("ran {}", params["name"].as_str().unwrap_or("")) }],
            }),
            "resources/list" => json!({
                "resources": self
                    .resources
                    .iter()
                    .map(|(uri, _)| json!({ "uri": uri, "name": uri }))
                    .collect::<Vec<_>>(),
            }),
            "resources/read" => {
                let uri = params["uri"].as_str().unwrap_or("");
                let text = self
                    .resources
                    .iter()
                    .find(|(u, _)| u == uri)
                    .map(|(_, t)| t.clone())
                    .unwrap_or_default();
                json!({ "contents": [{ "uri": uri, "text": text }] })
            }
            _ => json!({}),
        }
    }
}

impl Respond for McpBackend {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let method = body["method"].as_str().unwrap_or("");
        let reply = json!({ "jsonrpc": "2.0", "id": id, "result": self.result(method, &body["params"]) });

        let mut template = ResponseTemplate::new(200).set_body_json(reply);
        if method == "initialize" {
            let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            template = template.insert_header(SESSION_HEADER, format!("sess-{n}").as_str());
        }
        template
    }
}

/// JSON-RPC methods received by `server`, in order.
pub async fn received_methods(server: &MockServer) -> Vec<(String, Value)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .map(|body| {
            (
                body["method"].as_str().unwrap_or("").to_string(),
                body["params"].clone(),
            )
        })
        .collect()
}
