//! Input-schema and tool synthesis for REST endpoints.

use serde_json::{json, Map, Value};

use crate::config::{EndpointDescriptor, ParamSpec};
use crate::federation::namespace::api_tool_name;
use crate::protocol::Tool;

/// Name of the property that carries the request body.
pub const BODY_PROPERTY: &str = "body";

/// Build the object schema for one endpoint.
///
/// Path parameters are required unless marked otherwise, query parameters
/// only when marked required, and a declared body schema is nested under
/// `body` and always required. `required` lists path params, then query
/// params, then `body`.
pub fn build_input_schema(endpoint: &EndpointDescriptor) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for param in &endpoint.path_params {
        properties.insert(param.name.clone(), param_schema(param, "Path parameter"));
        if param.required.unwrap_or(true) {
            required.push(param.name.clone());
        }
    }

    for param in &endpoint.query_params {
        properties.insert(param.name.clone(), param_schema(param, "Query parameter"));
        if param.required.unwrap_or(false) {
            required.push(param.name.clone());
        }
    }

    if let Some(body) = endpoint.body_schema.as_ref().filter(|b| !b.is_null()) {
        properties.insert(BODY_PROPERTY.to_string(), body.clone());
        required.push(BODY_PROPERTY.to_string());
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn param_schema(param: &ParamSpec, location: &str) -> Value {
    let description = param
        .description
        .clone()
        .unwrap_or_else(|| format!("{location}: {}", param.name));
    json!({
        "type": param.param_type,
        "description": description,
    })
}

/// The namespaced tool for one endpoint of `wrapper`.
pub fn build_tool(wrapper: &str, endpoint: &EndpointDescriptor) -> Tool {
    Tool {
        name: api_tool_name(wrapper, &endpoint.name),
        description: Some(
            endpoint
                .description
                .clone()
                .unwrap_or_else(|| format!("Call {}", endpoint.path)),
        ),
        input_schema: build_input_schema(endpoint),
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointDescriptor {
        EndpointDescriptor {
            name: "update_item".into(),
            method: "PUT".into(),
            path: "/items/{id}".into(),
            description: None,
            path_params: vec![ParamSpec::new("id")],
            query_params: vec![ParamSpec::new("q")],
            body_schema: Some(json!({"type": "object", "properties": {"title": {"type": "string"}}})),
        }
    }

    #[test]
    fn test_required_is_path_params_then_body() {
        let schema = build_input_schema(&endpoint());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["id", "body"]));

        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("id"));
        assert!(props.contains_key("q"));
        assert!(props.contains_key("body"));
        assert_eq!(props["body"]["properties"]["title"]["type"], "string");
    }

    #[test]
    fn test_default_descriptions_and_types() {
        let schema = build_input_schema(&endpoint());
        assert_eq!(schema["properties"]["id"]["description"], "Path parameter: id");
        assert_eq!(schema["properties"]["q"]["description"], "Query parameter: q");
        assert_eq!(schema["properties"]["q"]["type"], "string");
    }

    #[test]
    fn test_explicit_required_flags_override_defaults() {
        let mut ep = endpoint();
        ep.path_params = vec![ParamSpec::new("id").required(false)];
        ep.query_params = vec![ParamSpec::new("q").required(true)];
        ep.body_schema = None;
        let schema = build_input_schema(&ep);
        assert_eq!(schema["required"], json!(["q"]));
        assert!(schema["properties"].get("body").is_none());
    }

    #[test]
    fn test_no_params_gives_empty_object_schema() {
        let ep = EndpointDescriptor {
            path_params: vec![],
            query_params: vec![],
            body_schema: None,
            ..endpoint()
        };
        let schema = build_input_schema(&ep);
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn test_build_tool_names_and_describes() {
        let tool = build_tool("inventory", &endpoint());
        assert_eq!(tool.name, "api:inventory:update_item");
        assert_eq!(tool.description.as_deref(), Some("Call /items/{id}"));
        assert_eq!(tool.input_schema, build_input_schema(&endpoint()));
    }
}
