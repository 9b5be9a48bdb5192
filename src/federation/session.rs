//! Session capability: the handshaken, catalog-bearing channel to one
//! backend.
//!
//! The registry only ever sees `dyn Session`, obtained through a
//! [`SessionConnector`]. [`McpSession`] is the production implementation
//! over a [`Transport`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{BackendConfig, TransportSettings};
use crate::errors::GatewayError;
use crate::protocol::{
    CallToolResult, ContentItem, InitializeResult, ListPage, Prompt, PromptResult,
    ReadResourceResult, Resource, ServerInfo, Tool, PROTOCOL_VERSION,
};
use crate::transport::stdio::format_stderr_suffix;
use crate::transport::{extract_result, Transport};

/// Upper bound on `nextCursor` pages fetched for one list call.
const MAX_LIST_PAGES: usize = 100;

// ─── Session ─────────────────────────────────────────────────────────────────

/// Operations available on a connected backend.
#[async_trait]
pub trait Session: Send + Sync {
    /// Capability set advertised during the handshake.
    fn capabilities(&self) -> Value;

    fn server_info(&self) -> Option<ServerInfo>;

    async fn list_tools(&self) -> Result<Vec<Tool>, GatewayError>;

    /// Invoke a tool. A tool-level failure (`isError`) is still content and
    /// is returned as such; protocol-level failures are errors.
    async fn call_tool(&self, name: &str, arguments: Value)
        -> Result<Vec<ContentItem>, GatewayError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, GatewayError>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptResult, GatewayError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, GatewayError>;

    /// Read a resource and return the text of its first content entry.
    async fn read_resource(&self, uri: &str) -> Result<String, GatewayError>;

    /// Release the underlying channel.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Produces sessions for backend configs.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, config: &BackendConfig) -> Result<Box<dyn Session>, GatewayError>;
}

// ─── Transport-backed Connector ──────────────────────────────────────────────

/// Opens a [`Transport`] and performs the MCP handshake over it.
pub struct TransportConnector {
    transports: TransportSettings,
}

impl TransportConnector {
    pub fn new(transports: TransportSettings) -> Self {
        Self { transports }
    }
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self::new(TransportSettings::default())
    }
}

#[async_trait]
impl SessionConnector for TransportConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<Box<dyn Session>, GatewayError> {
        if !self.transports.is_enabled(config.transport) {
            return Err(GatewayError::config(format!(
                "unsupported transport type: {} (disabled in configuration)",
                config.transport
            )));
        }

        let transport = Transport::connect(config).await?;
        let request_timeout = Duration::from_secs(config.request_timeout);
        let session = McpSession::initialize(&config.name, transport, request_timeout).await?;
        Ok(Box::new(session))
    }
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// A protocol session over one transport.
pub struct McpSession {
    name: String,
    transport: Transport,
    request_timeout: Duration,
    init: InitializeResult,
}

impl McpSession {
    /// Perform the `initialize` handshake followed by the `initialized`
    /// notification. The transport is torn down if either step fails.
    pub async fn initialize(
        name: &str,
        transport: Transport,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let mut session = Self {
            name: name.to_string(),
            transport,
            request_timeout,
            init: InitializeResult::default(),
        };

        match session.handshake().await {
            Ok(init) => {
                tracing::info!(
                    server = name,
                    transport = %session.transport.kind(),
                    protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
                    "handshake complete"
                );
                session.init = init;
                Ok(session)
            }
            Err(e) => {
                let stderr = session.transport.diagnostics();
                if !stderr.is_empty() {
                    tracing::warn!(server = name, stderr = %stderr, "server stderr captured on failure");
                }
                session.transport.disconnect().await;
                Err(GatewayError::connection(
                    name,
                    format!("handshake failed: {e}{}", format_stderr_suffix(&stderr)),
                ))
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, GatewayError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpilot",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = self.call("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            GatewayError::connection(&self.name, format!("failed to parse initialize response: {e}"))
        })?;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(init)
    }

    /// One request with the per-request timeout applied.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        tracing::debug!(server = %self.name, method, "sending request");
        let response = tokio::time::timeout(self.request_timeout, self.transport.request(method, params))
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: format!("{method} on '{}'", self.name),
                timeout_ms: self.request_timeout.as_millis() as u64,
            })??;
        extract_result(&self.name, response)
    }

    fn parse<T: DeserializeOwned>(&self, method: &str, value: Value) -> Result<T, GatewayError> {
        serde_json::from_value(value).map_err(|e| GatewayError::UpstreamError {
            name: self.name.clone(),
            code: None,
            message: format!("invalid {method} result: {e}"),
        })
    }

    /// Fetch every page of a `*/list` method.
    async fn list_all<T: DeserializeOwned>(&self, method: &str) -> Result<Vec<T>, GatewayError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let page: ListPage<T> = self.parse(method, self.call(method, params).await?)?;
            items.extend(page.items);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        tracing::warn!(server = %self.name, method, "stopped paginating after {MAX_LIST_PAGES} pages");
        Ok(items)
    }

    /// Whether the backend advertised `capability` (e.g. `"prompts"`).
    fn advertises(&self, capability: &str) -> bool {
        self.init
            .capabilities
            .get(capability)
            .is_some_and(|v| !v.is_null())
    }
}

#[async_trait]
impl Session for McpSession {
    fn capabilities(&self) -> Value {
        self.init.capabilities.clone()
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.init.server_info.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, GatewayError> {
        self.list_all("tools/list").await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result: CallToolResult = self.parse("tools/call", self.call("tools/call", Some(params)).await?)?;
        if result.is_error {
            tracing::debug!(server = %self.name, tool = name, "tool reported an error result");
        }
        Ok(result.content)
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, GatewayError> {
        if !self.advertises("prompts") {
            return Ok(Vec::new());
        }
        self.list_all("prompts/list").await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptResult, GatewayError> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = serde_json::json!(args);
        }
        self.parse("prompts/get", self.call("prompts/get", Some(params)).await?)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, GatewayError> {
        if !self.advertises("resources") {
            return Ok(Vec::new());
        }
        self.list_all("resources/list").await
    }

    async fn read_resource(&self, uri: &str) -> Result<String, GatewayError> {
        let params = serde_json::json!({ "uri": uri });
        let result: ReadResourceResult =
            self.parse("resources/read", self.call("resources/read", Some(params)).await?)?;
        Ok(result.into_text())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.transport.disconnect().await;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
