//! In-process fakes shared by unit tests: a scripted session connector and a
//! wiremock responder that speaks enough MCP over HTTP for handshake and
//! catalog tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use wiremock::{Request, Respond, ResponseTemplate};

use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::federation::session::{Session, SessionConnector};
use crate::protocol::{
    ContentItem, Prompt, PromptMessage, PromptResult, Resource, ServerInfo, Tool,
};

// ─── Mock Connector ──────────────────────────────────────────────────────────

/// Behavior of one scripted backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    tools: Vec<String>,
    prompts: Vec<String>,
    resources: Vec<(String, String)>,
    connect_error: Option<String>,
    delay: Option<Duration>,
    broken_lists: bool,
    failing_close: bool,
}

impl MockBackend {
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    /// A backend whose connect attempts fail with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            connect_error: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn broken_lists(mut self) -> Self {
        self.broken_lists = true;
        self
    }

    pub fn prompts(mut self, prompts: &[&str]) -> Self {
        self.prompts = prompts.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn resources(mut self, resources: &[(&str, &str)]) -> Self {
        self.resources = resources
            .iter()
            .map(|(uri, text)| (uri.to_string(), text.to_string()))
            .collect();
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    live: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}

/// Hands out [`MockSession`]s and counts what happens to them.
#[derive(Default)]
pub struct MockConnector {
    backends: HashMap<String, MockBackend>,
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, name: &str, backend: MockBackend) -> Self {
        self.backends.insert(name.to_string(), backend);
        self
    }

    /// A config that passes validation and routes to this connector.
    pub fn config(name: &str) -> BackendConfig {
        BackendConfig::stdio(name, "mock", &[])
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Sessions handed out for `name` and not yet closed.
    pub fn live_sessions(&self, name: &str) -> usize {
        self.shared
            .live
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Log of dispatched operations, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<Box<dyn Session>, GatewayError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let backend = self
            .backends
            .get(&config.name)
            .cloned()
            .ok_or_else(|| GatewayError::connection(&config.name, "no such mock backend"))?;

        if let Some(delay) = backend.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &backend.connect_error {
            return Err(GatewayError::connection(&config.name, reason.clone()));
        }

        *self
            .shared
            .live
            .lock()
            .unwrap()
            .entry(config.name.clone())
            .or_default() += 1;
        Ok(Box::new(MockSession {
            name: config.name.clone(),
            backend,
            shared: Arc::clone(&self.shared),
        }))
    }
}

pub struct MockSession {
    name: String,
    backend: MockBackend,
    shared: Arc<Shared>,
}

impl MockSession {
    fn log(&self, entry: String) {
        self.shared.calls.lock().unwrap().push(entry);
    }

    fn check_lists(&self) -> Result<(), GatewayError> {
        if self.backend.broken_lists {
            return Err(GatewayError::UpstreamError {
                name: self.name.clone(),
                code: Some(-32603),
                message: "list failed".into(),
            });
        }
        Ok(())
    }

    fn unknown(&self, what: &str) -> GatewayError {
        GatewayError::UpstreamError {
            name: self.name.clone(),
            code: Some(-32602),
            message: format!("unknown {what}"),
        }
    }
}

#[async_trait]
impl Session for MockSession {
    fn capabilities(&self) -> Value {
        json!({ "tools": {} })
    }

    fn server_info(&self) -> Option<ServerInfo> {
        Some(ServerInfo {
            name: Some(format!("mock-{}", self.name)),
            version: Some("0.0.1".into()),
        })
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, GatewayError> {
        self.check_lists()?;
        Ok(self
            .backend
            .tools
            .iter()
            .map(|name| Tool {
                name: name.clone(),
                description: None,
                input_schema: json!({ "type": "object" }),
                extra: Map::new(),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        self.log(format!("call_tool {} {name}", self.name));
        if !self.backend.tools.iter().any(|t| t == name) {
            return Err(self.unknown(&format!("tool {name}")));
        }
        Ok(vec![ContentItem::text(format!("{}/{name} {arguments}", self.name))])
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, GatewayError> {
        self.check_lists()?;
        Ok(self
            .backend
            .prompts
            .iter()
            .map(|name| Prompt {
                name: name.clone(),
                description: None,
                arguments: vec![],
                extra: Map::new(),
            })
            .collect())
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptResult, GatewayError> {
        self.log(format!("get_prompt {} {name}", self.name));
        if !self.backend.prompts.iter().any(|p| p == name) {
            return Err(self.unknown(&format!("prompt {name}")));
        }
        let mut args: Vec<(String, String)> = arguments.unwrap_or_default().into_iter().collect();
        args.sort();
        let values: Vec<String> = args.into_iter().map(|(_, v)| v).collect();
        Ok(PromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: "user".into(),
                content: ContentItem::text(format!("{name} {}", values.join(" "))),
            }],
        })
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, GatewayError> {
        self.check_lists()?;
        Ok(self
            .backend
            .resources
            .iter()
            .map(|(uri, _)| Resource {
                uri: uri.clone(),
                name: uri.clone(),
                description: None,
                mime_type: Some("text/plain".into()),
                extra: Map::new(),
            })
            .collect())
    }

    async fn read_resource(&self, uri: &str) -> Result<String, GatewayError> {
        self.log(format!("read_resource {} {uri}", self.name));
        self.backend
            .resources
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| self.unknown(&format!("resource {uri}")))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if let Some(count) = self.shared.live.lock().unwrap().get_mut(&self.name) {
            *count = count.saturating_sub(1);
        }
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        if self.backend.failing_close {
            return Err(GatewayError::connection(&self.name, "close failed"));
        }
        Ok(())
    }
}

// ─── Fake MCP Server ─────────────────────────────────────────────────────────

/// Answers MCP JSON-RPC over plain HTTP POST.
#[derive(Clone)]
pub struct FakeMcpServer {
    tools: Vec<String>,
    page_size: usize,
    prompts: Vec<String>,
    resources: Vec<(String, String)>,
}

impl FakeMcpServer {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            page_size: usize::MAX,
            prompts: vec![],
            resources: vec![],
        }
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn prompts(mut self, prompts: &[&str]) -> Self {
        self.prompts = prompts.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn resources(mut self, resources: &[(&str, &str)]) -> Self {
        self.resources = resources
            .iter()
            .map(|(uri, text)| (uri.to_string(), text.to_string()))
            .collect();
        self
    }

    fn dispatch(&self, method: &str, params: &Value) -> Result<Value, (i32, String)> {
        match method {
            "initialize" => {
                let mut capabilities = json!({ "tools": {} });
                if !self.prompts.is_empty() {
                    capabilities["prompts"] = json!({});
                }
                if !self.resources.is_empty() {
                    capabilities["resources"] = json!({});
                }
                Ok(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "serverInfo": { "name": "fake-server", "version": "1.0" },
                }))
            }
            "tools/list" => {
                let start: usize = params["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let end = start.saturating_add(self.page_size).min(self.tools.len());
                let page: Vec<Value> = self.tools[start.min(end)..end]
                    .iter()
                    .map(|name| json!({ "name": name, "inputSchema": { "type": "object" } }))
                    .collect();
                let mut result = json!({ "tools": page });
                if end < self.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                Ok(result)
            }
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                if !self.tools.iter().any(|t| t == name) {
                    return Err((-32602, format!("unknown tool: {name}")));
                }
                Ok(json!({ "content": [{ "type": "text", "text": format!("{name} called") }] }))
            }
            "prompts/list" => Ok(json!({
                "prompts": self.prompts.iter().map(|p| json!({ "name": p })).collect::<Vec<_>>(),
            })),
            "prompts/get" => {
                let name = params["name"].as_str().unwrap_or_default();
                let mut args: Vec<(String, String)> = params["arguments"]
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                args.sort();
                let values: Vec<String> = args.into_iter().map(|(_, v)| v).collect();
                Ok(json!({
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": format!("{name}: {}", values.join(",")) },
                    }],
                }))
            }
            "resources/list" => Ok(json!({
                "resources": self
                    .resources
                    .iter()
                    .map(|(uri, _)| json!({ "uri": uri, "name": uri }))
                    .collect::<Vec<_>>(),
            })),
            "resources/read" => {
                let uri = params["uri"].as_str().unwrap_or_default();
                self.resources
                    .iter()
                    .find(|(u, _)| u == uri)
                    .map(|(u, text)| json!({ "contents": [{ "uri": u, "text": text }] }))
                    .ok_or_else(|| (-32602, format!("unknown resource: {uri}")))
            }
            other => Err((-32601, format!("method not found: {other}"))),
        }
    }
}

impl Respond for FakeMcpServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let method = body["method"].as_str().unwrap_or_default();
        let reply = match self.dispatch(method, &body["params"]) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        };
        ResponseTemplate::new(200).set_body_json(reply)
    }
}
