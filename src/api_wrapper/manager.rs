//! All configured API wrappers behind one dispatch point.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use super::wrapper::{ApiWrapper, WrapperStatus};
use crate::config::WrapperConfig;
use crate::errors::GatewayError;
use crate::federation::namespace::parse_api_tool_name;
use crate::protocol::{ContentItem, Tool};

#[derive(Default)]
pub struct ApiWrapperManager {
    wrappers: RwLock<Vec<Arc<ApiWrapper>>>,
}

impl ApiWrapperManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled wrapper. A wrapper that fails to build is logged
    /// and left out; the others still come up.
    pub fn initialize(&self, configs: &[WrapperConfig]) {
        for config in configs.iter().filter(|c| c.enabled) {
            if let Err(e) = self.add(config.clone()) {
                tracing::error!(wrapper = %config.name, error = %e, "failed to initialize API wrapper");
            }
        }
        tracing::info!(count = self.len(), "API wrapper manager initialized");
    }

    /// Register a wrapper, replacing any existing one with the same name.
    pub fn add(&self, config: WrapperConfig) -> Result<(), GatewayError> {
        let wrapper = Arc::new(ApiWrapper::new(config)?);
        let mut wrappers = self.wrappers.write().unwrap_or_else(PoisonError::into_inner);
        match wrappers.iter().position(|w| w.name() == wrapper.name()) {
            Some(idx) => wrappers[idx] = wrapper,
            None => wrappers.push(wrapper),
        }
        Ok(())
    }

    /// Drop a wrapper. Returns whether one was registered under `name`.
    pub fn remove(&self, name: &str) -> bool {
        let mut wrappers = self.wrappers.write().unwrap_or_else(PoisonError::into_inner);
        let before = wrappers.len();
        wrappers.retain(|w| w.name() != name);
        wrappers.len() != before
    }

    fn get(&self, name: &str) -> Option<Arc<ApiWrapper>> {
        self.wrappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.name() == name)
            .cloned()
    }

    /// Every generated tool, wrapper by wrapper.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.wrappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|w| w.tools().iter().cloned())
            .collect()
    }

    /// Route `api:{wrapper}:{endpoint}` to its wrapper.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        let (wrapper_name, _) = parse_api_tool_name(name)?;
        let wrapper = self
            .get(wrapper_name)
            .ok_or_else(|| GatewayError::not_found("api wrapper", wrapper_name))?;
        wrapper.call_tool(name, arguments).await
    }

    pub fn status(&self) -> BTreeMap<String, WrapperStatus> {
        self.wrappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|w| (w.name().to_string(), w.status()))
            .collect()
    }

    /// Release every wrapper and its HTTP client.
    pub fn shutdown(&self) {
        let count = {
            let mut wrappers = self.wrappers.write().unwrap_or_else(PoisonError::into_inner);
            let count = wrappers.len();
            wrappers.clear();
            count
        };
        tracing::info!(count, "API wrapper manager shut down");
    }

    pub fn len(&self) -> usize {
        self.wrappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, EndpointDescriptor};
    use serde_json::json;

    fn config(name: &str, endpoints: &[&str], enabled: bool) -> WrapperConfig {
        WrapperConfig {
            name: name.into(),
            base_url: "http://127.0.0.1:1".into(),
            auth: AuthConfig::None,
            endpoints: endpoints
                .iter()
                .map(|e| EndpointDescriptor {
                    name: e.to_string(),
                    method: "GET".into(),
                    path: format!("/{e}"),
                    description: None,
                    path_params: vec![],
                    query_params: vec![],
                    body_schema: None,
                })
                .collect(),
            enabled,
            timeout: 1,
        }
    }

    #[test]
    fn test_initialize_skips_disabled_and_invalid() {
        let manager = ApiWrapperManager::new();
        let mut broken = config("broken", &["a"], true);
        broken.base_url = String::new();
        manager.initialize(&[
            config("one", &["a", "b"], true),
            config("off", &["c"], false),
            broken,
        ]);

        assert_eq!(manager.len(), 1);
        let names: Vec<String> = manager.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["api:one:a", "api:one:b"]);
    }

    #[test]
    fn test_add_replaces_same_name() {
        let manager = ApiWrapperManager::new();
        manager.add(config("svc", &["a"], true)).unwrap();
        manager.add(config("svc", &["a", "b", "c"], true)).unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.status()["svc"].tools_count, 3);
    }

    #[test]
    fn test_remove_and_shutdown() {
        let manager = ApiWrapperManager::new();
        manager.add(config("a", &["x"], true)).unwrap();
        manager.add(config("b", &["y"], true)).unwrap();
        assert!(manager.remove("a"));
        assert!(!manager.remove("a"));
        manager.shutdown();
        assert!(manager.is_empty());
        assert!(manager.list_tools().is_empty());
    }

    #[tokio::test]
    async fn test_call_unknown_wrapper_is_not_found() {
        let manager = ApiWrapperManager::new();
        let err = manager.call_tool("api:ghost:get", &json!({})).await.unwrap_err();
        assert!(err.is_not_found());

        let err = manager.call_tool("api:ghost", &json!({})).await.unwrap_err();
        assert!(err.is_format_error());
    }
}
