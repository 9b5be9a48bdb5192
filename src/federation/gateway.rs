//! Gateway: the single public surface over the registry, router and API
//! wrappers.
//!
//! Each `Gateway` owns its own state, so several can coexist in one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::registry::{BackendStatus, ConnectionRegistry, ConnectionStatus};
use super::router::NamespaceRouter;
use super::session::{SessionConnector, TransportConnector};
use crate::api_wrapper::{ApiWrapperManager, WrapperStatus};
use crate::config::{BackendConfig, GatewayConfig, WrapperConfig};
use crate::errors::GatewayError;
use crate::protocol::{ContentItem, Prompt, PromptResult, Resource, Tool};

/// Connection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetrics {
    pub servers_connected: usize,
    pub servers_total: usize,
    pub wrappers_total: usize,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    wrappers: Arc<ApiWrapperManager>,
    router: NamespaceRouter,
    initialized: tokio::sync::Mutex<bool>,
}

impl Gateway {
    /// A gateway that reaches backends over real transports.
    pub fn new(config: GatewayConfig) -> Self {
        let connector = Arc::new(TransportConnector::new(config.transports.clone()));
        Self::with_connector(config, connector)
    }

    /// A gateway that obtains sessions from `connector`.
    pub fn with_connector(config: GatewayConfig, connector: Arc<dyn SessionConnector>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(connector));
        let wrappers = Arc::new(ApiWrapperManager::new());
        let router = NamespaceRouter::new(Arc::clone(&registry), Arc::clone(&wrappers));
        Self {
            config,
            registry,
            wrappers,
            router,
            initialized: tokio::sync::Mutex::new(false),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Bring up API wrappers and connect every enabled backend. Backends are
    /// connected concurrently; individual failures are recorded on their
    /// records. Calling again after success does nothing.
    pub async fn initialize(&self) {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return;
        }
        tracing::info!(
            backends = self.config.mcp_servers.len(),
            wrappers = self.config.api_wrappers.len(),
            "initializing gateway"
        );

        self.wrappers.initialize(&self.config.api_wrappers);

        let connects = self
            .config
            .mcp_servers
            .iter()
            .filter(|c| c.enabled)
            .map(|c| self.registry.connect(c.clone()));
        let results = futures::future::join_all(connects).await;
        let connected = results.iter().filter(|ok| **ok).count();

        *initialized = true;
        tracing::info!(
            connected,
            attempted = results.len(),
            "gateway initialized"
        );
    }

    /// Disconnect every backend and release every wrapper.
    pub async fn shutdown(&self) {
        let mut initialized = self.initialized.lock().await;
        tracing::info!("shutting down gateway");
        for name in self.registry.names() {
            self.registry.disconnect(&name).await;
        }
        self.wrappers.shutdown();
        *initialized = false;
        tracing::info!("gateway shutdown complete");
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    // ─── Backend Management ──────────────────────────────────────────────

    /// Connect (or reconnect) one backend. The outcome is also visible via
    /// [`Gateway::get_server_status`].
    pub async fn connect_backend(&self, config: BackendConfig) -> bool {
        self.registry.connect(config).await
    }

    pub async fn disconnect_backend(&self, name: &str) {
        self.registry.disconnect(name).await;
    }

    /// Reconnect a known backend with its stored config.
    pub async fn reconnect_backend(&self, name: &str) -> Result<bool, GatewayError> {
        self.registry.reconnect(name).await
    }

    /// Replace a backend's config and reconnect it. A disabled config only
    /// disconnects the backend.
    pub async fn update_backend(&self, config: BackendConfig) -> bool {
        if config.enabled {
            return self.registry.connect(config).await;
        }
        self.registry.disconnect(&config.name).await;
        tracing::info!(server = %config.name, "backend disabled");
        false
    }

    pub async fn remove_backend(&self, name: &str) {
        self.registry.remove(name).await;
    }

    /// Register (or replace) an API wrapper at runtime.
    pub fn add_api_wrapper(&self, config: WrapperConfig) -> Result<(), GatewayError> {
        self.wrappers.add(config)
    }

    pub fn remove_api_wrapper(&self, name: &str) -> bool {
        self.wrappers.remove(name)
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    pub async fn list_tools(&self, filter: Option<&[String]>) -> Vec<Tool> {
        self.router.list_tools(filter).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        self.router.call_tool(name, arguments).await
    }

    pub async fn list_prompts(&self, filter: Option<&[String]>) -> Vec<Prompt> {
        self.router.list_prompts(filter).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptResult, GatewayError> {
        self.router.get_prompt(name, arguments).await
    }

    pub async fn list_resources(&self, filter: Option<&[String]>) -> Vec<Resource> {
        self.router.list_resources(filter).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<String, GatewayError> {
        self.router.read_resource(uri).await
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn get_server_status(&self) -> BTreeMap<String, BackendStatus> {
        self.registry.statuses()
    }

    pub fn get_wrapper_status(&self) -> BTreeMap<String, WrapperStatus> {
        self.wrappers.status()
    }

    pub fn get_metrics(&self) -> GatewayMetrics {
        let statuses = self.registry.statuses();
        GatewayMetrics {
            servers_connected: statuses
                .values()
                .filter(|s| s.status == ConnectionStatus::Connected)
                .count(),
            servers_total: statuses.len(),
            wrappers_total: self.wrappers.len(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
