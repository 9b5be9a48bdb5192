//! Gateway configuration loading and validation.
//!
//! Reads a YAML file describing the backends to federate and the REST APIs
//! to wrap, resolving environment variables first so credentials can stay
//! out of the file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Prefix reserved for API-wrapper tools; no backend may use it as a name.
pub const RESERVED_API_PREFIX: &str = "api";

/// Environment variable that points at the config file.
pub const CONFIG_PATH_ENV: &str = "MCPILOT_CONFIG";

// ─── Backends ────────────────────────────────────────────────────────────────

/// Transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    #[default]
    Stdio,
    /// Streamable HTTP (one POST per request).
    Http,
    /// Full-duplex WebSocket.
    Websocket,
    /// Legacy HTTP + server-sent events.
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Websocket => write!(f, "websocket"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Configuration for one federated backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub transport: TransportKind,
    /// Executable for `stdio` backends.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for `stdio` backends.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Endpoint for network backends.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connect (transport + handshake) timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub timeout: u64,
    /// Per-request timeout in seconds once connected.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl BackendConfig {
    /// A `stdio` backend with defaults for everything else.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            enabled: true,
            timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }

    /// A network backend with defaults for everything else.
    pub fn network(name: &str, transport: TransportKind, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: Some(url.to_string()),
            enabled: true,
            timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }

    /// Check the name rules and the fields the transport kind requires.
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_backend_name(&self.name)?;
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(GatewayError::config(format!(
                        "backend '{}': command is required for stdio transport",
                        self.name
                    )));
                }
            }
            kind => {
                if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(GatewayError::config(format!(
                        "backend '{}': url is required for {kind} transport",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Backend names become namespace prefixes, so they must survive a round
/// trip through `"{name}:{tool}"` and `"mcp://{name}/{uri}"`.
pub fn validate_backend_name(name: &str) -> Result<(), GatewayError> {
    if name.trim().is_empty() {
        return Err(GatewayError::config("backend name must not be empty"));
    }
    if name == RESERVED_API_PREFIX {
        return Err(GatewayError::config(format!(
            "backend name '{RESERVED_API_PREFIX}' is reserved for API wrappers"
        )));
    }
    if name.contains(':') || name.contains('/') {
        return Err(GatewayError::config(format!(
            "backend name '{name}' must not contain ':' or '/'"
        )));
    }
    Ok(())
}

// ─── API Wrappers ────────────────────────────────────────────────────────────

/// Authentication applied to every request a wrapper sends.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// Custom header carrying a key.
    ApiKey {
        #[serde(default = "default_api_key_header")]
        key_name: String,
        api_key: String,
    },
    /// HTTP basic authentication.
    Basic { username: String, password: String },
}

impl AuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Basic { .. } => "basic",
        }
    }
}

/// One declared path or query parameter of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default = "default_param_type", rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unset means the location default: path parameters are required,
    /// query parameters are optional.
    #[serde(default)]
    pub required: Option<bool>,
}

impl ParamSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: default_param_type(),
            description: None,
            required: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }
}

/// A REST endpoint exposed as one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Path template with `{param}` placeholders, relative to the base URL.
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub path_params: Vec<ParamSpec>,
    #[serde(default)]
    pub query_params: Vec<ParamSpec>,
    #[serde(default)]
    pub body_schema: Option<serde_json::Value>,
}

/// A REST API adapted into protocol-native tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_wrapper_timeout")]
    pub timeout: u64,
}

impl WrapperConfig {
    /// Check naming rules, endpoint uniqueness and HTTP methods.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() || self.name.contains(':') {
            return Err(GatewayError::config(format!(
                "wrapper name '{}' must be non-empty and must not contain ':'",
                self.name
            )));
        }
        if self.base_url.trim().is_empty() {
            return Err(GatewayError::config(format!(
                "wrapper '{}': base_url is required",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() || endpoint.name.contains(':') {
                return Err(GatewayError::config(format!(
                    "wrapper '{}': endpoint name '{}' must be non-empty and must not contain ':'",
                    self.name, endpoint.name
                )));
            }
            if !seen.insert(endpoint.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "wrapper '{}': duplicate endpoint '{}'",
                    self.name, endpoint.name
                )));
            }
            if reqwest::Method::from_bytes(endpoint.method.to_uppercase().as_bytes()).is_err() {
                return Err(GatewayError::config(format!(
                    "wrapper '{}': endpoint '{}' has invalid HTTP method '{}'",
                    self.name, endpoint.name, endpoint.method
                )));
            }
        }
        Ok(())
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Per-kind transport switches. A disabled kind makes every backend using it
/// fail to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_true")]
    pub stdio: bool,
    #[serde(default = "default_true")]
    pub http: bool,
    #[serde(default = "default_true")]
    pub websocket: bool,
    #[serde(default = "default_true")]
    pub sse: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            stdio: true,
            http: true,
            websocket: true,
            sse: true,
        }
    }
}

impl TransportSettings {
    pub fn is_enabled(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Stdio => self.stdio,
            TransportKind::Http => self.http,
            TransportKind::Websocket => self.websocket,
            TransportKind::Sse => self.sse,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transports: TransportSettings,
    #[serde(default)]
    pub mcp_servers: Vec<BackendConfig>,
    #[serde(default)]
    pub api_wrappers: Vec<WrapperConfig>,
}

impl GatewayConfig {
    /// Validate every backend and wrapper and the cross-entry uniqueness
    /// rules.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut backend_names = HashSet::new();
        for backend in &self.mcp_servers {
            backend.validate()?;
            if !backend_names.insert(backend.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
        }

        let mut wrapper_names = HashSet::new();
        for wrapper in &self.api_wrappers {
            wrapper.validate()?;
            if !wrapper_names.insert(wrapper.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate api wrapper name '{}'",
                    wrapper.name
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    60
}
fn default_wrapper_timeout() -> u64 {
    30
}
fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}
fn default_param_type() -> String {
    "string".to_string()
}
fn default_method() -> String {
    "GET".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the gateway config file.
///
/// Order: `MCPILOT_CONFIG`, `./mcpilot.yaml`, then
/// `<platform config dir>/mcpilot/config.yaml`.
pub fn find_config_path() -> Result<PathBuf, GatewayError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        return Err(GatewayError::config(format!(
            "{CONFIG_PATH_ENV} points at '{}', which does not exist",
            candidate.display()
        )));
    }

    let local = PathBuf::from("mcpilot.yaml");
    if local.exists() {
        return Ok(local);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("mcpilot").join("config.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(GatewayError::config("could not find mcpilot.yaml"))
}

/// Load, interpolate, parse and validate the gateway configuration file.
pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig, GatewayError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::config(format!("failed to read {}: {e}", path.display()))
    })?;
    parse_gateway_config(&raw)
}

/// Parse configuration from YAML text.
pub fn parse_gateway_config(raw: &str) -> Result<GatewayConfig, GatewayError> {
    let interpolated = interpolate_env_vars(raw);

    let config: GatewayConfig = serde_yaml::from_str(&interpolated)
        .map_err(|e| GatewayError::config(format!("failed to parse config: {e}")))?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
