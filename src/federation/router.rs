//! Namespace router: federated catalogs and prefix-based dispatch.
//!
//! Listing walks connected backends one at a time in registration order; a
//! backend that fails contributes nothing and the walk continues. Single
//! target operations parse the namespaced identifier first, so malformed
//! names fail before any backend is touched.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::namespace::{
    backend_item_name, is_api_name, parse_backend_item_name, parse_resource_uri, resource_uri,
};
use super::registry::ConnectionRegistry;
use crate::api_wrapper::ApiWrapperManager;
use crate::errors::GatewayError;
use crate::protocol::{ContentItem, Prompt, PromptResult, Resource, Tool};

pub struct NamespaceRouter {
    registry: Arc<ConnectionRegistry>,
    wrappers: Arc<ApiWrapperManager>,
}

impl NamespaceRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, wrappers: Arc<ApiWrapperManager>) -> Self {
        Self { registry, wrappers }
    }

    /// Connected backends, optionally restricted to `filter`.
    fn targets(&self, filter: Option<&[String]>) -> Vec<String> {
        self.registry
            .connected_names()
            .into_iter()
            .filter(|name| filter.map_or(true, |f| f.iter().any(|n| n == name)))
            .collect()
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// Backend tools (renamed `backend:tool`) followed by every API-wrapper
    /// tool. The filter only applies to backends.
    pub async fn list_tools(&self, filter: Option<&[String]>) -> Vec<Tool> {
        let mut all = Vec::new();

        for backend in self.targets(filter) {
            let result = match self.registry.lease(&backend).await {
                Ok(session) => session.list_tools().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(tools) => all.extend(tools.into_iter().map(|mut tool| {
                    tool.name = backend_item_name(&backend, &tool.name);
                    tool
                })),
                Err(e) => {
                    tracing::warn!(server = %backend, error = %e, "error listing tools");
                }
            }
        }

        all.extend(self.wrappers.list_tools());
        all
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        if is_api_name(name) {
            return self.wrappers.call_tool(name, &arguments).await;
        }

        let (backend, tool) = parse_backend_item_name(name)?;
        let session = self.registry.lease(backend).await?;
        session.call_tool(tool, arguments).await.map_err(|e| {
            tracing::error!(server = backend, tool, error = %e, "tool call failed");
            e
        })
    }

    // ─── Prompts ─────────────────────────────────────────────────────────

    pub async fn list_prompts(&self, filter: Option<&[String]>) -> Vec<Prompt> {
        let mut all = Vec::new();

        for backend in self.targets(filter) {
            let result = match self.registry.lease(&backend).await {
                Ok(session) => session.list_prompts().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(prompts) => all.extend(prompts.into_iter().map(|mut prompt| {
                    prompt.name = backend_item_name(&backend, &prompt.name);
                    prompt
                })),
                Err(e) => {
                    tracing::warn!(server = %backend, error = %e, "error listing prompts");
                }
            }
        }

        all
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptResult, GatewayError> {
        let (backend, prompt) = parse_backend_item_name(name)?;
        let session = self.registry.lease(backend).await?;
        session.get_prompt(prompt, arguments).await.map_err(|e| {
            tracing::error!(server = backend, prompt, error = %e, "get prompt failed");
            e
        })
    }

    // ─── Resources ───────────────────────────────────────────────────────

    pub async fn list_resources(&self, filter: Option<&[String]>) -> Vec<Resource> {
        let mut all = Vec::new();

        for backend in self.targets(filter) {
            let result = match self.registry.lease(&backend).await {
                Ok(session) => session.list_resources().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(resources) => all.extend(resources.into_iter().map(|mut resource| {
                    resource.uri = resource_uri(&backend, &resource.uri);
                    resource
                })),
                Err(e) => {
                    tracing::warn!(server = %backend, error = %e, "error listing resources");
                }
            }
        }

        all
    }

    pub async fn read_resource(&self, uri: &str) -> Result<String, GatewayError> {
        let (backend, original) = parse_resource_uri(uri)?;
        let session = self.registry.lease(backend).await?;
        session.read_resource(original).await.map_err(|e| {
            tracing::error!(server = backend, uri = original, error = %e, "resource read failed");
            e
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, EndpointDescriptor, WrapperConfig};
    use crate::federation::registry::ConnectionStatus;
    use crate::test_support::{MockBackend, MockConnector};
    use serde_json::json;

    async fn router(connector: MockConnector, connect: &[&str]) -> (Arc<MockConnector>, NamespaceRouter) {
        let connector = Arc::new(connector);
        let registry = Arc::new(ConnectionRegistry::new(connector.clone()));
        for name in connect {
            registry.connect(MockConnector::config(name)).await;
        }
        let wrappers = Arc::new(ApiWrapperManager::new());
        (connector, NamespaceRouter::new(registry, wrappers))
    }

    fn wrapper_config() -> WrapperConfig {
        WrapperConfig {
            name: "w".into(),
            base_url: "http://127.0.0.1:1".into(),
            auth: AuthConfig::None,
            endpoints: vec![EndpointDescriptor {
                name: "e".into(),
                method: "GET".into(),
                path: "/e".into(),
                description: None,
                path_params: vec![],
                query_params: vec![],
                body_schema: None,
            }],
            enabled: true,
            timeout: 1,
        }
    }

    fn names<T>(items: &[T], f: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| f(i).to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_tools_skips_disconnected_backend() {
        let (_, router) = router(
            MockConnector::new()
                .with_backend("A", MockBackend::with_tools(&["x", "y"]))
                .with_backend("B", MockBackend::with_tools(&["z"])),
            &["A"],
        )
        .await;
        // B is registered, then disconnected.
        router.registry.connect(MockConnector::config("B")).await;
        router.registry.disconnect("B").await;
        assert_eq!(router.registry.status("B"), Some(ConnectionStatus::Disconnected));

        let tools = router.list_tools(None).await;
        assert_eq!(names(&tools, |t| &t.name), vec!["A:x", "A:y"]);
    }

    #[tokio::test]
    async fn test_list_tools_tolerates_failing_backend_and_appends_api_tools() {
        let (_, router) = router(
            MockConnector::new()
                .with_backend("bad", MockBackend::with_tools(&["q"]).broken_lists())
                .with_backend("good", MockBackend::with_tools(&["t"])),
            &["bad", "good"],
        )
        .await;
        router.wrappers.add(wrapper_config()).unwrap();

        let tools = router.list_tools(None).await;
        assert_eq!(names(&tools, |t| &t.name), vec!["good:t", "api:w:e"]);
    }

    #[tokio::test]
    async fn test_filter_limits_backends_not_api_tools() {
        let (_, router) = router(
            MockConnector::new()
                .with_backend("A", MockBackend::with_tools(&["x"]))
                .with_backend("B", MockBackend::with_tools(&["y"])),
            &["A", "B"],
        )
        .await;
        router.wrappers.add(wrapper_config()).unwrap();

        let filter = vec!["B".to_string()];
        let tools = router.list_tools(Some(&filter)).await;
        assert_eq!(names(&tools, |t| &t.name), vec!["B:y", "api:w:e"]);
    }

    #[tokio::test]
    async fn test_call_tool_dispatches_original_name() {
        let (connector, router) = router(
            MockConnector::new().with_backend("A", MockBackend::with_tools(&["x"])),
            &["A"],
        )
        .await;
        let content = router.call_tool("A:x", json!({"k": 1})).await.unwrap();
        assert_eq!(content[0].as_text(), Some("A/x {\"k\":1}"));
        assert_eq!(connector.calls(), vec!["call_tool A x"]);
    }

    #[tokio::test]
    async fn test_call_tool_errors() {
        let (_, router) = router(
            MockConnector::new()
                .with_backend("A", MockBackend::with_tools(&["x"]))
                .with_backend("down", MockBackend::failing("refused")),
            &["A", "down"],
        )
        .await;

        assert!(router.call_tool("x", json!({})).await.unwrap_err().is_format_error());
        assert!(router.call_tool("ghost:x", json!({})).await.unwrap_err().is_not_found());
        assert!(matches!(
            router.call_tool("down:x", json!({})).await,
            Err(GatewayError::InvalidState { .. })
        ));
        assert!(matches!(
            router.call_tool("A:missing", json!({})).await,
            Err(GatewayError::UpstreamError { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_names_go_to_wrappers() {
        let (connector, router) = router(MockConnector::new(), &[]).await;
        router.wrappers.add(wrapper_config()).unwrap();
        let content = router.call_tool("api:w:e", json!({})).await.unwrap();
        assert!(content[0].as_text().unwrap().starts_with("API call error:"));
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prompts_are_namespaced_and_dispatched() {
        let (_, router) = router(
            MockConnector::new().with_backend("A", MockBackend::with_tools(&[]).prompts(&["greet"])),
            &["A"],
        )
        .await;
        let prompts = router.list_prompts(None).await;
        assert_eq!(names(&prompts, |p| &p.name), vec!["A:greet"]);

        let mut args = HashMap::new();
        args.insert("who".to_string(), "bob".to_string());
        let result = router.get_prompt("A:greet", Some(args)).await.unwrap();
        assert_eq!(result.messages[0].content.as_text(), Some("greet bob"));
    }

    #[tokio::test]
    async fn test_resources_roundtrip_through_uri_form() {
        let (connector, router) = router(
            MockConnector::new().with_backend(
                "notes",
                MockBackend::with_tools(&[]).resources(&[("file.txt", "hello")]),
            ),
            &["notes"],
        )
        .await;

        let resources = router.list_resources(None).await;
        assert_eq!(names(&resources, |r| &r.uri), vec!["mcp://notes/file.txt"]);

        assert_eq!(router.read_resource("mcp://notes/file.txt").await.unwrap(), "hello");
        assert_eq!(connector.calls(), vec!["read_resource notes file.txt"]);

        let err = router.read_resource("notes/file.txt").await.unwrap_err();
        assert!(err.is_format_error());
        assert_eq!(connector.calls().len(), 1);
    }
}
