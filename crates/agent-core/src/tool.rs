//! Tool System
//!
//! Tools are not implemented locally: every broker publishes its own catalog
//! and executes calls remotely. The agent sees them through three pieces:
//!
//! - [`ToolDefinition`]: normalized function-calling schema for one tool
//! - [`ToolCatalog`]: the immutable set of definitions offered to the model
//! - [`ToolExecutor`]: whatever actually runs the call (a broker protocol client)

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::salvage::salvage_json;
use crate::schema::{normalize_parameters, ObjectSchema};

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id assigned by the model, echoed back in the tool turn
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments object
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Decode the raw argument string a model attached to a tool call.
///
/// Anything that is not a JSON object (unparseable text, `null`, scalars)
/// is replaced with `{}` so the call still reaches the broker, which then
/// reports its own validation error back to the model.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return empty_arguments();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            tracing::warn!(arguments = %other, "Tool arguments are not an object, using {{}}");
            empty_arguments()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable tool arguments, using {{}}");
            empty_arguments()
        }
    }
}

/// Normalized outcome of a tool invocation, identical for every broker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whatever structured payload the broker returned
    pub raw_payload: Value,

    /// Human-readable text extracted from the payload
    pub text: String,

    /// Set when the call failed; failures are data, not errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(raw_payload: Value, text: impl Into<String>) -> Self {
        Self {
            raw_payload,
            text: text.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            raw_payload: Value::Null,
            text: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_raw(mut self, raw_payload: Value) -> Self {
        self.raw_payload = raw_payload;
        self
    }

    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Content fed back to the model as the tool turn
    pub fn observation(&self) -> String {
        match &self.error {
            Some(error) if self.text.is_empty() => format!("Error: {error}"),
            Some(error) => format!("Error: {error}\n{}", self.text),
            None if self.text.is_empty() => self.raw_payload.to_string(),
            None => self.text.clone(),
        }
    }

    /// Structured data carried by the text, recovered by the salvage chain.
    ///
    /// Fails with `MalformedToolOutput` when no strategy finds JSON.
    pub fn structured(&self) -> Result<Value> {
        salvage_json(&self.text)
    }
}

/// Function-calling definition of a broker tool
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

impl ToolDefinition {
    /// Build from a broker's native tool description
    pub fn from_native(name: impl Into<String>, description: Option<&str>, input_schema: Option<&Value>) -> Self {
        Self {
            name: name.into(),
            description: description.unwrap_or_default().to_string(),
            parameters: input_schema.map(normalize_parameters).unwrap_or_default(),
        }
    }

    /// Render in the chat-completion `tools` wire shape
    pub fn to_function_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json_schema(),
            }
        })
    }
}

/// Immutable set of tool definitions offered to the model
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All definitions, ordered by name
    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    /// List tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<ToolDefinition> for ToolCatalog {
    fn from_iter<I: IntoIterator<Item = ToolDefinition>>(iter: I) -> Self {
        Self {
            tools: iter.into_iter().map(|def| (def.name.clone(), def)).collect(),
        }
    }
}

/// Executes tool calls on behalf of the agent
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one call; failures come back inside the `ToolResult`
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_object() {
        let args = parse_arguments(r#"{"symbol": "SBIN", "qty": 5}"#);
        assert_eq!(args["symbol"], "SBIN");
        assert_eq!(args["qty"], 5);
    }

    #[test]
    fn test_parse_arguments_falls_back_to_empty_object() {
        assert_eq!(parse_arguments("{not json"), json!({}));
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("null"), json!({}));
        assert_eq!(parse_arguments("[1, 2]"), json!({}));
    }

    #[test]
    fn test_observation_formats() {
        let ok = ToolResult::success(json!({"cash": 10}), "");
        assert_eq!(ok.observation(), r#"{"cash":10}"#);

        let failed = ToolResult::failure("token expired");
        assert!(failed.is_error());
        assert_eq!(failed.observation(), "Error: token expired");
    }

    #[test]
    fn test_structured_salvages_text() {
        let result = ToolResult::success(Value::Null, "Holdings:\n```json\n[{\"symbol\": \"SBIN\"}]\n```");
        assert_eq!(result.structured().unwrap(), json!([{"symbol": "SBIN"}]));

        let prose = ToolResult::success(Value::Null, "no data today");
        assert!(prose.structured().is_err());
    }

    #[test]
    fn test_catalog_from_native_definitions() {
        let catalog: ToolCatalog = [
            ToolDefinition::from_native("get_quotes", Some("Live quotes"), Some(&json!({
                "type": "object",
                "properties": {"instruments": {"type": "array"}},
                "required": ["instruments"]
            }))),
            ToolDefinition::from_native("get_profile", None, None),
        ]
        .into_iter()
        .collect();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names(), ["get_profile", "get_quotes"]);

        let wire = catalog.get("get_quotes").unwrap().to_function_json();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["parameters"]["properties"]["instruments"]["items"]["type"], "string");
        assert_eq!(wire["function"]["parameters"]["required"], json!(["instruments"]));
    }
}
