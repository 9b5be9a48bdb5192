//! Namespacing rules for the federated catalog.
//!
//! - backend tool/prompt: `"{backend}:{original}"`
//! - API-wrapper tool: `"api:{wrapper}:{endpoint}"`
//! - backend resource: `"mcp://{backend}/{originalUri}"`
//!
//! Every builder has a parser that recovers the parts, so dispatch never
//! needs a lookup table.

use crate::config::RESERVED_API_PREFIX;
use crate::errors::GatewayError;

/// Scheme prefix of federated resource URIs.
pub const RESOURCE_SCHEME: &str = "mcp://";

pub fn backend_item_name(backend: &str, original: &str) -> String {
    format!("{backend}:{original}")
}

pub fn api_tool_name(wrapper: &str, endpoint: &str) -> String {
    format!("{RESERVED_API_PREFIX}:{wrapper}:{endpoint}")
}

pub fn resource_uri(backend: &str, original_uri: &str) -> String {
    format!("{RESOURCE_SCHEME}{backend}/{original_uri}")
}

/// Whether `name` belongs to the API-wrapper family.
pub fn is_api_name(name: &str) -> bool {
    name.strip_prefix(RESERVED_API_PREFIX)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Split `"{backend}:{original}"`. Exactly one `:` is allowed.
pub fn parse_backend_item_name(name: &str) -> Result<(&str, &str), GatewayError> {
    let mut parts = name.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(backend), Some(original), None) if !backend.is_empty() && !original.is_empty() => {
            Ok((backend, original))
        }
        _ => Err(GatewayError::malformed(
            name,
            "expected '<backend>:<name>' with exactly one ':'",
        )),
    }
}

/// Split `"api:{wrapper}:{endpoint}"` into `(wrapper, endpoint)`.
pub fn parse_api_tool_name(name: &str) -> Result<(&str, &str), GatewayError> {
    let parts: Vec<&str> = name.split(':').collect();
    match parts.as_slice() {
        [prefix, wrapper, endpoint]
            if *prefix == RESERVED_API_PREFIX && !wrapper.is_empty() && !endpoint.is_empty() =>
        {
            Ok((*wrapper, *endpoint))
        }
        _ => Err(GatewayError::malformed(
            name,
            "expected 'api:<wrapper>:<endpoint>'",
        )),
    }
}

/// Split `"mcp://{backend}/{originalUri}"`. The original URI may itself
/// contain `/`.
pub fn parse_resource_uri(uri: &str) -> Result<(&str, &str), GatewayError> {
    let rest = uri
        .strip_prefix(RESOURCE_SCHEME)
        .ok_or_else(|| GatewayError::malformed(uri, format!("resource URI must start with '{RESOURCE_SCHEME}'")))?;
    match rest.split_once('/') {
        Some((backend, original)) if !backend.is_empty() && !original.is_empty() => {
            Ok((backend, original))
        }
        _ => Err(GatewayError::malformed(
            uri,
            "expected 'mcp://<backend>/<uri>'",
        )),
    }
}
