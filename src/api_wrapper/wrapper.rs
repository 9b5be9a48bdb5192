//! One REST API exposed as a set of tools.
//!
//! Tools are generated once at construction. Calls translate arguments into
//! an HTTP request; HTTP and network failures come back as text content, not
//! errors, because a tool call always yields content.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde_json::{Map, Value};

use super::schema::{build_tool, BODY_PROPERTY};
use crate::config::{AuthConfig, EndpointDescriptor, WrapperConfig};
use crate::errors::GatewayError;
use crate::federation::namespace::parse_api_tool_name;
use crate::protocol::{ContentItem, Tool};

/// TCP connection timeout for wrapped APIs.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Externally visible summary of one wrapper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperStatus {
    pub enabled: bool,
    pub base_url: String,
    pub tools_count: usize,
    pub auth_type: String,
}

pub struct ApiWrapper {
    config: WrapperConfig,
    client: Client,
    tools: Vec<Tool>,
}

impl ApiWrapper {
    /// Validate the config, build the authenticated client and generate one
    /// tool per endpoint.
    pub fn new(config: WrapperConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout))
            .default_headers(auth_headers(&config)?)
            .build()
            .map_err(|e| {
                GatewayError::config(format!(
                    "wrapper '{}': failed to build HTTP client: {e}",
                    config.name
                ))
            })?;

        let tools = config
            .endpoints
            .iter()
            .map(|endpoint| build_tool(&config.name, endpoint))
            .collect();

        tracing::info!(
            wrapper = %config.name,
            base_url = %config.base_url,
            auth = config.auth.kind(),
            endpoints = config.endpoints.len(),
            "API wrapper initialized"
        );

        Ok(Self {
            config,
            client,
            tools,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    /// Generated tools, one per endpoint, in declaration order.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn status(&self) -> WrapperStatus {
        WrapperStatus {
            enabled: self.config.enabled,
            base_url: self.config.base_url.clone(),
            tools_count: self.tools.len(),
            auth_type: self.config.auth.kind().to_string(),
        }
    }

    fn endpoint(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.config.endpoints.iter().find(|e| e.name == name)
    }

    /// Execute the endpoint behind a namespaced tool name.
    ///
    /// Errors only for names that do not belong to this wrapper, unknown
    /// endpoints and arguments that are neither an object nor null.
    /// Everything past that point is reported as content.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<Vec<ContentItem>, GatewayError> {
        let (wrapper, endpoint_name) = parse_api_tool_name(name)?;
        if wrapper != self.config.name {
            return Err(GatewayError::malformed(
                name,
                format!("tool does not belong to wrapper '{}'", self.config.name),
            ));
        }
        let endpoint = self
            .endpoint(endpoint_name)
            .ok_or_else(|| GatewayError::not_found("endpoint", endpoint_name))?;

        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(GatewayError::malformed(name, "arguments must be a JSON object")),
        };

        let text = match self.build_request(endpoint, args) {
            Ok(request) => execute(request).await,
            Err(e) => format!("API call error: {e}"),
        };
        tracing::debug!(wrapper = %self.config.name, endpoint = endpoint_name, "API call finished");
        Ok(vec![ContentItem::text(text)])
    }

    fn build_request(
        &self,
        endpoint: &EndpointDescriptor,
        args: &Map<String, Value>,
    ) -> Result<RequestBuilder, GatewayError> {
        let method = Method::from_bytes(endpoint.method.to_uppercase().as_bytes())
            .map_err(|e| GatewayError::config(format!("invalid HTTP method '{}': {e}", endpoint.method)))?;
        let url = endpoint_url(&self.config.base_url, &endpoint.path, args)?;

        let query: Vec<(&str, String)> = endpoint
            .query_params
            .iter()
            .filter_map(|p| args.get(&p.name).map(|v| (p.name.as_str(), stringify(v))))
            .collect();

        let mut request = self.client.request(method, url);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = args.get(BODY_PROPERTY) {
            request = request.json(body);
        }
        if let AuthConfig::Basic { username, password } = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }
        Ok(request)
    }
}

/// Send the request and describe the outcome as text.
async fn execute(request: RequestBuilder) -> String {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return format!("API call error: {e}"),
    };
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return format!("API call error: {e}"),
    };

    if !status.is_success() {
        return format!("API call failed (HTTP {}): {body}", status.as_u16());
    }

    let rendered = match serde_json::from_str::<Value>(&body) {
        Ok(data) => data.to_string(),
        Err(_) => body,
    };
    format!("API call successful (HTTP {})\nResponse: {rendered}", status.as_u16())
}

/// Headers sent with every request for header-based auth kinds.
fn auth_headers(config: &WrapperConfig) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    let invalid = |what: &str| {
        GatewayError::config(format!("wrapper '{}': invalid {what}", config.name))
    };

    match &config.auth {
        AuthConfig::None | AuthConfig::Basic { .. } => {}
        AuthConfig::Bearer { token } => {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| invalid("bearer token"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        AuthConfig::ApiKey { key_name, api_key } => {
            let name = HeaderName::from_bytes(key_name.as_bytes())
                .map_err(|_| invalid("api key header name"))?;
            let mut value = HeaderValue::from_str(api_key).map_err(|_| invalid("api key"))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

/// Replace every `{key}` in `template` with the stringified argument.
fn substitute_path(template: &str, args: &Map<String, Value>) -> String {
    args.iter().fold(template.to_string(), |path, (key, value)| {
        path.replace(&format!("{{{key}}}"), &stringify(value))
    })
}

/// Strings as-is, everything else as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Append the templated endpoint path to `base`. Each segment is filled in
/// separately and percent-encoded, so argument values never add segments,
/// a query or a fragment.
fn endpoint_url(
    base: &str,
    template: &str,
    args: &Map<String, Value>,
) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base)
        .map_err(|e| GatewayError::config(format!("invalid base URL '{base}': {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| GatewayError::config(format!("base URL '{base}' cannot carry a path")))?;
        segments.pop_if_empty();
        for segment in template.trim_start_matches('/').split('/') {
            segments.push(&substitute_path(segment, args));
        }
    }
    Ok(url)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
